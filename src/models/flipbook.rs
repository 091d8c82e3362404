//! An assembled flipbook and the response envelope returned to clients.

use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

/// A materialized flipbook under `output/<id>/`.
#[derive(Clone, Debug)]
pub struct Flipbook {
    /// Output directory name and public URL path segment.
    pub id: Uuid,

    /// Absolute or config-relative location of the output directory.
    pub dir: PathBuf,

    /// Sequenced filenames installed under `pages_new/`, sorted.
    pub pages: Vec<String>,
}

impl Flipbook {
    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }

    /// Public URL of this flipbook below `base_url`.
    pub fn public_url(&self, base_url: &str) -> String {
        format!("{}/flipbook/{}", base_url.trim_end_matches('/'), self.id)
    }
}

/// JSON body of a successful `POST /upload-jpgs`.
#[derive(Serialize, Debug)]
pub struct FlipbookResponse {
    pub message: String,
    pub folder_id: Uuid,
    pub total_pages: usize,
    pub url: String,
}

impl FlipbookResponse {
    pub fn new(flipbook: &Flipbook, base_url: &str) -> Self {
        Self {
            message: "Flipbook created successfully!".into(),
            folder_id: flipbook.id,
            total_pages: flipbook.total_pages(),
            url: flipbook.public_url(base_url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_ignores_trailing_slash() {
        let flipbook = Flipbook {
            id: Uuid::nil(),
            dir: PathBuf::from("output"),
            pages: vec!["0001.jpg".into()],
        };
        let expected = format!("https://books.example/flipbook/{}", Uuid::nil());
        assert_eq!(flipbook.public_url("https://books.example/"), expected);
        assert_eq!(flipbook.public_url("https://books.example"), expected);

        let body = serde_json::to_value(FlipbookResponse::new(&flipbook, "https://books.example"))
            .unwrap();
        assert_eq!(body["total_pages"], 1);
        assert_eq!(body["folder_id"], Uuid::nil().to_string());
        assert_eq!(body["url"], expected);
    }
}
