use std::path::Path;
use std::path::PathBuf;

/// Location of the cached image for `entity_key` (`<domain>.<tag mac>`).
///
/// The key is used as given: tags whose MACs differ only in case keep
/// separate files.
pub fn image_path(image_dir: &Path, entity_key: &str) -> PathBuf {
    image_dir.join(format!("{}.jpg", entity_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_path() {
        let path = image_path(Path::new("/srv/images"), "open_epaper_link.0000021EDE1F3B1A");
        assert_eq!(
            path,
            PathBuf::from("/srv/images/open_epaper_link.0000021EDE1F3B1A.jpg")
        );
    }

    #[test]
    fn test_image_path_keeps_case() {
        let dir = Path::new("/srv/images");
        assert_ne!(
            image_path(dir, "open_epaper_link.AbCd"),
            image_path(dir, "open_epaper_link.abcd")
        );
    }
}
