//! 结果条目与图像记录的关联方式
//!
//! 提交时按显示模式把图像投影为路径；处理结果时用同一投影反向查找图像。

use crate::entities::{DisplayMode, Image};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageIdentity {
    /// 源格式显示模式，结果路径即图像的存储路径
    Path,
    /// 派生显示模式，路径为 `{directory}/{name}.{extension}`
    ProjectedPath { directory: String, extension: String },
}

/// 图像查询键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageLookupKey {
    Path(String),
    Name(String),
}

impl ImageLookupKey {
    pub fn value(&self) -> &str {
        match self {
            ImageLookupKey::Path(v) | ImageLookupKey::Name(v) => v,
        }
    }
}

impl ImageIdentity {
    pub fn for_display_mode(mode: Option<&DisplayMode>) -> Self {
        match mode {
            Some(mode) if !mode.is_source_format => ImageIdentity::ProjectedPath {
                directory: mode.directory.trim_end_matches('/').to_string(),
                extension: mode.extension.trim_start_matches('.').to_string(),
            },
            _ => ImageIdentity::Path,
        }
    }

    /// 图像在当前显示模式下提交给远程服务的路径
    pub fn project(&self, image: &Image) -> String {
        match self {
            ImageIdentity::Path => image.path.clone(),
            ImageIdentity::ProjectedPath {
                directory,
                extension,
            } => {
                if directory.is_empty() {
                    format!("{}.{}", image.name, extension)
                } else {
                    format!("{}/{}.{}", directory, image.name, extension)
                }
            }
        }
    }

    /// 结果条目路径对应的查询键
    pub fn lookup_key(&self, item_path: &str) -> ImageLookupKey {
        match self {
            ImageIdentity::Path => ImageLookupKey::Path(item_path.to_string()),
            ImageIdentity::ProjectedPath { .. } => {
                let stem = Path::new(item_path)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(item_path);
                ImageLookupKey::Name(stem.to_string())
            }
        }
    }

    /// 图像记录自身的查询键，与 `lookup_key` 对应
    pub fn key_of(&self, image: &Image) -> ImageLookupKey {
        match self {
            ImageIdentity::Path => ImageLookupKey::Path(image.path.clone()),
            ImageIdentity::ProjectedPath { .. } => ImageLookupKey::Name(image.name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Image {
        Image {
            id: 3,
            dataset_id: 1,
            path: "raw/cells/img.001.tif".to_string(),
            name: "img.001".to_string(),
        }
    }

    fn mode(is_source_format: bool) -> DisplayMode {
        DisplayMode {
            id: 9,
            dataset_id: 1,
            name: "thumbnails".to_string(),
            extension: ".png".to_string(),
            directory: "thumbs/".to_string(),
            is_source_format,
        }
    }

    #[test]
    fn test_source_format_uses_stored_path() {
        let identity = ImageIdentity::for_display_mode(Some(&mode(true)));
        assert_eq!(identity, ImageIdentity::Path);
        assert_eq!(identity.project(&image()), "raw/cells/img.001.tif");
        assert_eq!(
            identity.lookup_key("raw/cells/img.001.tif"),
            identity.key_of(&image())
        );
    }

    #[test]
    fn test_no_display_mode_uses_stored_path() {
        assert_eq!(ImageIdentity::for_display_mode(None), ImageIdentity::Path);
    }

    #[test]
    fn test_derived_mode_projection_round_trips_through_lookup() {
        let identity = ImageIdentity::for_display_mode(Some(&mode(false)));
        let projected = identity.project(&image());
        assert_eq!(projected, "thumbs/img.001.png");
        assert_eq!(identity.lookup_key(&projected), identity.key_of(&image()));
        assert_eq!(
            identity.lookup_key(&projected),
            ImageLookupKey::Name("img.001".to_string())
        );
    }
}
