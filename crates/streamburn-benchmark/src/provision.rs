use std::path::{Path, PathBuf};
use std::process::Stdio;
use streamburn_core::{Result, StreamBurnError};
use tokio::process::Command;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

/// Resolves model names to IR files under `<root>/**/<name>/<precision>/*.xml`,
/// fetching them with the Open Model Zoo downloader when configured.
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
    precision: String,
    downloader: Option<PathBuf>,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>, precision: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            precision: precision.into(),
            downloader: None,
        }
    }

    pub fn with_downloader(mut self, downloader: Option<PathBuf>) -> Self {
        self.downloader = downloader;
        self
    }

    /// First `downloader.py` under an Open Model Zoo checkout.
    pub fn locate_downloader(omz_dir: impl AsRef<Path>) -> Option<PathBuf> {
        WalkDir::new(omz_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name() == "downloader.py")
            .map(|e| e.into_path())
    }

    /// Return the model's IR path, downloading it first if it is missing.
    #[instrument(skip(self), fields(root = ?self.root))]
    pub async fn resolve(&self, name: &str) -> Result<PathBuf> {
        if let Some(path) = self.find(name) {
            debug!("Found {} at {:?}", name, path);
            return Ok(path);
        }

        let Some(downloader) = &self.downloader else {
            return Err(StreamBurnError::ModelNotFound(name.to_string()));
        };

        self.download(downloader, name).await?;
        self.find(name)
            .ok_or_else(|| StreamBurnError::ModelNotFound(name.to_string()))
    }

    fn find(&self, name: &str) -> Option<PathBuf> {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| {
                let path = e.path();
                let is_xml = path.extension().is_some_and(|ext| ext == "xml");
                let precision = path.parent();
                let model = precision.and_then(Path::parent);
                e.file_type().is_file()
                    && is_xml
                    && precision.and_then(Path::file_name).is_some_and(|p| p == self.precision.as_str())
                    && model.and_then(Path::file_name).is_some_and(|m| m == name)
            })
            .map(|e| e.into_path())
    }

    async fn download(&self, downloader: &Path, name: &str) -> Result<()> {
        info!("Downloading {} ({})", name, self.precision);
        std::fs::create_dir_all(&self.root)?;

        let status = Command::new("python3")
            .arg(downloader)
            .args(["--name", name, "--precisions", &self.precision, "--output_dir"])
            .arg(&self.root)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| StreamBurnError::Provisioning(format!("failed to run downloader: {}", e)))?;

        if !status.success() {
            return Err(StreamBurnError::Provisioning(format!(
                "downloader exited with {} for {}",
                status, name
            )));
        }
        Ok(())
    }
}

/// Use `arg` directly when it names an existing file, otherwise resolve it
/// as a model name.
pub async fn resolve_model_arg(store: &ModelStore, arg: &str) -> Result<PathBuf> {
    let path = Path::new(arg);
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    store.resolve(arg).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_ir(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "<net/>").unwrap();
        path
    }

    #[tokio::test]
    async fn test_resolves_matching_precision() {
        let dir = tempfile::tempdir().unwrap();
        make_ir(dir.path(), "intel/person-detection-retail-0013/FP16/person-detection-retail-0013.xml");
        let fp32 = make_ir(
            dir.path(),
            "intel/person-detection-retail-0013/FP32/person-detection-retail-0013.xml",
        );
        make_ir(dir.path(), "intel/person-detection-retail-0002/FP32/person-detection-retail-0002.xml");

        let store = ModelStore::new(dir.path(), "FP32");
        assert_eq!(store.resolve("person-detection-retail-0013").await.unwrap(), fp32);
    }

    #[tokio::test]
    async fn test_missing_without_downloader() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path(), "FP32");
        let err = store.resolve("age-gender-recognition-retail-0013").await.unwrap_err();
        assert!(matches!(err, StreamBurnError::ModelNotFound(name) if name == "age-gender-recognition-retail-0013"));
    }

    #[tokio::test]
    async fn test_existing_path_bypasses_store() {
        let dir = tempfile::tempdir().unwrap();
        let file = make_ir(dir.path(), "custom.xml");
        let store = ModelStore::new(dir.path().join("elsewhere"), "FP32");

        let resolved = resolve_model_arg(&store, file.to_str().unwrap()).await.unwrap();
        assert_eq!(resolved, file);
    }

    #[test]
    fn test_locate_downloader() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ModelStore::locate_downloader(dir.path()), None);

        let script = dir.path().join("tools/model_tools/downloader.py");
        fs::create_dir_all(script.parent().unwrap()).unwrap();
        fs::write(&script, "").unwrap();
        assert_eq!(ModelStore::locate_downloader(dir.path()), Some(script));
    }
}
