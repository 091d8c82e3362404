//! src/services/flipbook_service.rs
//!
//! FlipbookService — turns a batch of received multipart parts into a
//! flipbook on local disk. Layout beneath `output_dir`:
//!
//! - `temp-uploads/{id}/` — per-request staging, removed on success
//! - `{id}/`              — copy of `template_dir`
//! - `{id}/pages_new/`    — sequenced JPEGs (`0001.jpg`, `0002.jpeg`, ...)

use crate::{
    config::AppConfig,
    models::{flipbook::Flipbook, upload::UploadedFile},
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info};
use uuid::Uuid;

/// Subfolder of the output directory holding per-request staging dirs.
pub const STAGING_NAMESPACE: &str = "temp-uploads";

/// Subfolder of a flipbook receiving the sequenced pages.
pub const PAGES_DIR: &str = "pages_new";

#[derive(Debug, Error)]
pub enum FlipbookError {
    #[error("no valid JPEG files in upload")]
    NoValidFiles,
    #[error("too many files, at most {limit} are accepted")]
    TooManyFiles { limit: usize },
    #[error("unexpected file field `{0}`")]
    UnexpectedField(String),
    #[error("malformed multipart body: {0}")]
    Multipart(String),
    #[error("template directory `{}` is missing", .0.display())]
    TemplateMissing(PathBuf),
    #[error("copying template into `{}` failed: {source}", dest.display())]
    TemplateCopy {
        dest: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("moving page `{}` failed: {source}", file.display())]
    PageMove {
        file: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FlipbookError {
    /// Whether the failure was caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NoValidFiles
                | Self::TooManyFiles { .. }
                | Self::UnexpectedField(_)
                | Self::Multipart(_)
        )
    }
}

pub type FlipbookResult<T> = Result<T, FlipbookError>;

/// FlipbookService provides the upload pipeline:
/// - Store a received part under `upload_dir`
/// - Keep only JPEG-typed parts
/// - Sequence them into a staging directory
/// - Copy the template and install the pages into it
///
/// Requests share no mutable state; each works on directories keyed by its
/// own freshly generated id.
#[derive(Clone, Debug)]
pub struct FlipbookService {
    /// Fixed template tree copied per request.
    pub template_dir: PathBuf,

    /// Root directory for flipbooks and staging.
    pub output_dir: PathBuf,

    /// Landing area for raw multipart parts.
    pub upload_dir: PathBuf,

    /// Remove temporary state when a request fails.
    pub cleanup_on_failure: bool,
}

impl FlipbookService {
    pub fn new(
        template_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            template_dir: template_dir.into(),
            output_dir: output_dir.into(),
            upload_dir: upload_dir.into(),
            cleanup_on_failure: false,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            cleanup_on_failure: cfg.cleanup_on_failure,
            ..Self::new(&cfg.template_dir, &cfg.output_dir, &cfg.upload_dir)
        }
    }

    pub fn with_cleanup_on_failure(mut self, enabled: bool) -> Self {
        self.cleanup_on_failure = enabled;
        self
    }

    /// Staging directory for one request. Does not check for existence.
    pub fn staging_dir(&self, id: Uuid) -> PathBuf {
        self.output_dir.join(STAGING_NAMESPACE).join(id.to_string())
    }

    /// Output directory for one flipbook. Does not check for existence.
    pub fn flipbook_dir(&self, id: Uuid) -> PathBuf {
        self.output_dir.join(id.to_string())
    }

    /// Stream one multipart part to a generated name under `upload_dir`.
    ///
    /// Removes the partial file if the stream or a write fails.
    pub async fn store_upload<S>(
        &self,
        original_name: &str,
        content_type: Option<String>,
        stream: S,
    ) -> FlipbookResult<UploadedFile>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        fs::create_dir_all(&self.upload_dir).await?;
        let path = self.upload_dir.join(Uuid::new_v4().simple().to_string());
        let mut file = File::create(&path).await?;

        let mut size_bytes: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&path).await;
                    return Err(FlipbookError::Multipart(err.to_string()));
                }
            };
            size_bytes += chunk.len() as u64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&path).await;
                return Err(FlipbookError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&path).await;
            return Err(FlipbookError::Io(err));
        }

        debug!(
            "stored part `{}` ({} bytes) at {}",
            original_name,
            size_bytes,
            path.display()
        );

        Ok(UploadedFile {
            original_name: original_name.to_string(),
            content_type,
            path,
            size_bytes,
        })
    }

    /// Run the whole pipeline for one request.
    ///
    /// The staging directory is created before filtering, so it exists even
    /// when the request is rejected. With `cleanup_on_failure` set, every
    /// failure path removes staging, partial output and the received parts.
    pub async fn create_flipbook(&self, uploads: &[UploadedFile]) -> FlipbookResult<Flipbook> {
        let id = Uuid::new_v4();
        let staging = self.staging_dir(id);
        fs::create_dir_all(&staging).await?;

        match self.assemble(id, &staging, uploads).await {
            Ok(flipbook) => {
                info!(
                    "flipbook {} created with {} pages",
                    flipbook.id,
                    flipbook.total_pages()
                );
                Ok(flipbook)
            }
            Err(err) => {
                if self.cleanup_on_failure {
                    self.cleanup_failed(id, uploads).await;
                }
                Err(err)
            }
        }
    }

    async fn assemble(
        &self,
        id: Uuid,
        staging: &Path,
        uploads: &[UploadedFile],
    ) -> FlipbookResult<Flipbook> {
        let accepted = filter_jpegs(uploads);
        debug!(
            "{} of {} parts accepted for {}",
            accepted.len(),
            uploads.len(),
            id
        );
        if accepted.is_empty() {
            return Err(FlipbookError::NoValidFiles);
        }

        self.sequence_pages(&accepted, staging).await?;
        let dir = self.materialize_template(id).await?;
        let pages = self.install_pages(staging, &dir).await?;

        Ok(Flipbook { id, dir, pages })
    }

    /// Move accepted parts into `staging` as `0001.ext`, `0002.ext`, ...
    ///
    /// Returns the assigned names in submission order.
    pub async fn sequence_pages(
        &self,
        files: &[&UploadedFile],
        staging: &Path,
    ) -> FlipbookResult<Vec<String>> {
        fs::create_dir_all(staging).await?;
        let mut names = Vec::with_capacity(files.len());
        for (index, upload) in files.iter().enumerate() {
            let name = sequenced_name(index + 1, upload);
            move_file(&upload.path, &staging.join(&name)).await?;
            debug!("sequenced `{}` as {}", upload.original_name, name);
            names.push(name);
        }
        Ok(names)
    }

    /// Recursively copy the template tree into `output_dir/{id}`.
    pub async fn materialize_template(&self, id: Uuid) -> FlipbookResult<PathBuf> {
        match fs::metadata(&self.template_dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(FlipbookError::TemplateMissing(self.template_dir.clone())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(FlipbookError::TemplateMissing(self.template_dir.clone()));
            }
            Err(err) => return Err(FlipbookError::Io(err)),
        }

        let dest = self.flipbook_dir(id);
        let copied = copy_tree(&self.template_dir, &dest)
            .await
            .map_err(|source| FlipbookError::TemplateCopy {
                dest: dest.clone(),
                source,
            })?;
        debug!("copied {} template entries into {}", copied, dest.display());

        Ok(dest)
    }

    /// Move every staged file into `flipbook_dir/pages_new`, then remove
    /// the staging directory.
    ///
    /// A failure mid-way leaves already-moved pages in place.
    pub async fn install_pages(
        &self,
        staging: &Path,
        flipbook_dir: &Path,
    ) -> FlipbookResult<Vec<String>> {
        let pages_dir = flipbook_dir.join(PAGES_DIR);
        fs::create_dir_all(&pages_dir).await?;

        let mut names = Vec::new();
        let mut entries = fs::read_dir(staging).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        for name in &names {
            let src = staging.join(name);
            move_file(&src, &pages_dir.join(name))
                .await
                .map_err(|source| FlipbookError::PageMove {
                    file: src.clone(),
                    source,
                })?;
        }

        fs::remove_dir_all(staging).await?;
        Ok(names)
    }

    /// Best-effort removal of received parts that never reached a flipbook.
    pub async fn discard_uploads(&self, uploads: &[UploadedFile]) {
        for upload in uploads {
            remove_quietly(&upload.path, false).await;
        }
    }

    async fn cleanup_failed(&self, id: Uuid, uploads: &[UploadedFile]) {
        remove_quietly(&self.staging_dir(id), true).await;
        remove_quietly(&self.flipbook_dir(id), true).await;
        self.discard_uploads(uploads).await;
    }
}

/// True when the declared type is `image/jpeg` or `image/jpg`, ignoring case.
pub fn is_jpeg_mime(content_type: &str) -> bool {
    content_type.eq_ignore_ascii_case("image/jpeg") || content_type.eq_ignore_ascii_case("image/jpg")
}

/// Keep JPEG-typed parts in their original order. Looks at the declared type only.
pub fn filter_jpegs(uploads: &[UploadedFile]) -> Vec<&UploadedFile> {
    uploads
        .iter()
        .filter(|u| u.content_type.as_deref().is_some_and(is_jpeg_mime))
        .collect()
}

/// `pad4(position) + lowercased extension`, position being 1-based.
pub fn sequenced_name(position: usize, upload: &UploadedFile) -> String {
    format!("{:04}{}", position, upload.extension())
}

/// Rename `from` to `to`, copying across filesystems. Refuses to overwrite.
async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::try_exists(to).await? {
        return Err(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("{} already exists", to.display()),
        ));
    }
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::CrossesDevices => {
            fs::copy(from, to).await?;
            fs::remove_file(from).await
        }
        Err(err) => Err(err),
    }
}

/// Copy a directory tree, creating `dst`. Returns the number of non-directory
/// entries copied.
async fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
    let mut copied = 0;

    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to).await?;
        let mut entries = fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let target = to.join(entry.file_name());
            if file_type.is_dir() {
                pending.push((entry.path(), target));
                continue;
            }
            if file_type.is_symlink() {
                copy_symlink(&entry.path(), &target).await?;
            } else {
                fs::copy(entry.path(), &target).await?;
            }
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(unix)]
async fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let link = fs::read_link(src).await?;
    fs::symlink(link, dst).await
}

#[cfg(not(unix))]
async fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).await.map(|_| ())
}

async fn remove_quietly(path: &Path, is_dir: bool) {
    let result = if is_dir {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    match result {
        Ok(_) => debug!("removed {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => debug!("failed to remove {}: {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::fs as std_fs;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        service: FlipbookService,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let template = root.path().join("template");
        std_fs::create_dir_all(template.join("assets/css")).unwrap();
        std_fs::write(template.join("index.html"), "<html></html>").unwrap();
        std_fs::write(template.join("assets/css/book.css"), "body {}").unwrap();

        let service = FlipbookService::new(
            template,
            root.path().join("output"),
            root.path().join("uploads"),
        );
        Fixture {
            _root: root,
            service,
        }
    }

    async fn receive(service: &FlipbookService, name: &str, mime: &str, body: &str) -> UploadedFile {
        let chunks = vec![Ok(Bytes::from(body.to_string()))];
        service
            .store_upload(name, Some(mime.to_string()), stream::iter(chunks))
            .await
            .unwrap()
    }

    fn list(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std_fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn jpeg_mime_matching_is_case_insensitive() {
        assert!(is_jpeg_mime("image/jpeg"));
        assert!(is_jpeg_mime("image/jpg"));
        assert!(is_jpeg_mime("IMAGE/JPEG"));
        assert!(!is_jpeg_mime("image/png"));
        assert!(!is_jpeg_mime("image/jpeg2000"));
        assert!(!is_jpeg_mime(""));
    }

    #[test]
    fn sequenced_names_are_zero_padded() {
        let upload = UploadedFile {
            original_name: "Scan.JPEG".into(),
            content_type: Some("image/jpeg".into()),
            path: PathBuf::from("x"),
            size_bytes: 0,
        };
        assert_eq!(sequenced_name(1, &upload), "0001.jpeg");
        assert_eq!(sequenced_name(20, &upload), "0020.jpeg");
    }

    #[tokio::test]
    async fn store_upload_writes_payload() {
        let fx = fixture();
        let chunks = vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"def"))];
        let upload = fx
            .service
            .store_upload("a.jpg", Some("image/jpeg".into()), stream::iter(chunks))
            .await
            .unwrap();

        assert_eq!(upload.size_bytes, 6);
        assert!(upload.path.starts_with(&fx.service.upload_dir));
        assert_eq!(std_fs::read(&upload.path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn store_upload_removes_partial_file_on_stream_error() {
        let fx = fixture();
        let chunks = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(ErrorKind::UnexpectedEof, "client went away")),
        ];
        let err = fx
            .service
            .store_upload("a.jpg", None, stream::iter(chunks))
            .await
            .unwrap_err();

        assert!(matches!(err, FlipbookError::Multipart(_)));
        assert!(list(&fx.service.upload_dir).is_empty());
    }

    #[tokio::test]
    async fn mixed_batch_keeps_only_jpegs_in_order() {
        let fx = fixture();
        let uploads = vec![
            receive(&fx.service, "a.JPG", "image/jpeg", "first").await,
            receive(&fx.service, "b.png", "image/png", "png").await,
            receive(&fx.service, "c.jpg", "image/jpg", "second").await,
        ];

        let flipbook = fx.service.create_flipbook(&uploads).await.unwrap();

        assert_eq!(flipbook.total_pages(), 2);
        let pages = flipbook.dir.join(PAGES_DIR);
        assert_eq!(list(&pages), vec!["0001.jpg", "0002.jpg"]);
        assert_eq!(std_fs::read_to_string(pages.join("0001.jpg")).unwrap(), "first");
        assert_eq!(std_fs::read_to_string(pages.join("0002.jpg")).unwrap(), "second");

        // template copied alongside the pages
        assert!(flipbook.dir.join("index.html").is_file());
        assert!(flipbook.dir.join("assets/css/book.css").is_file());

        // staging removed, rejected part left where it landed
        assert!(!fx.service.staging_dir(flipbook.id).exists());
        assert!(uploads[1].path.exists());
    }

    #[tokio::test]
    async fn all_rejected_creates_no_flipbook() {
        let fx = fixture();
        let uploads = vec![receive(&fx.service, "b.png", "image/png", "png").await];

        let err = fx.service.create_flipbook(&uploads).await.unwrap_err();

        assert!(matches!(err, FlipbookError::NoValidFiles));
        assert!(err.is_client_error());
        assert_eq!(list(&fx.service.output_dir), vec![STAGING_NAMESPACE]);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let fx = fixture();
        let err = fx.service.create_flipbook(&[]).await.unwrap_err();
        assert!(matches!(err, FlipbookError::NoValidFiles));
    }

    #[tokio::test]
    async fn missing_template_fails_without_output_dir() {
        let fx = fixture();
        std_fs::remove_dir_all(&fx.service.template_dir).unwrap();
        let uploads = vec![receive(&fx.service, "a.jpg", "image/jpeg", "page").await];

        let err = fx.service.create_flipbook(&uploads).await.unwrap_err();

        assert!(matches!(err, FlipbookError::TemplateMissing(_)));
        assert!(!err.is_client_error());
        assert_eq!(list(&fx.service.output_dir), vec![STAGING_NAMESPACE]);
        // without cleanup the sequenced page stays in staging
        let staged = fx.service.output_dir.join(STAGING_NAMESPACE);
        assert_eq!(list(&staged).len(), 1);
    }

    #[tokio::test]
    async fn cleanup_on_failure_removes_temporary_state() {
        let fx = fixture();
        let service = fx.service.clone().with_cleanup_on_failure(true);
        std_fs::remove_dir_all(&service.template_dir).unwrap();
        let uploads = vec![
            receive(&service, "a.jpg", "image/jpeg", "page").await,
            receive(&service, "b.png", "image/png", "png").await,
        ];

        service.create_flipbook(&uploads).await.unwrap_err();

        assert!(list(&service.output_dir.join(STAGING_NAMESPACE)).is_empty());
        assert!(list(&service.upload_dir).is_empty());
    }

    #[tokio::test]
    async fn identical_requests_get_distinct_flipbooks() {
        let fx = fixture();
        let first = vec![receive(&fx.service, "a.jpg", "image/jpeg", "one").await];
        let second = vec![receive(&fx.service, "a.jpg", "image/jpeg", "one").await];

        let a = fx.service.create_flipbook(&first).await.unwrap();
        let b = fx.service.create_flipbook(&second).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_ne!(a.dir, b.dir);
        assert_eq!(list(&a.dir.join(PAGES_DIR)), vec!["0001.jpg"]);
        assert_eq!(list(&b.dir.join(PAGES_DIR)), vec!["0001.jpg"]);
    }

    #[tokio::test]
    async fn install_refuses_to_overwrite_template_pages() {
        let fx = fixture();
        let template_pages = fx.service.template_dir.join(PAGES_DIR);
        std_fs::create_dir_all(&template_pages).unwrap();
        std_fs::write(template_pages.join("0001.jpg"), "sample").unwrap();
        let uploads = vec![receive(&fx.service, "a.jpg", "image/jpeg", "page").await];

        let err = fx.service.create_flipbook(&uploads).await.unwrap_err();

        assert!(matches!(err, FlipbookError::PageMove { .. }));
    }
}
