//! 通用工具函数

use std::path::Path;
use uuid::Uuid;

use crate::error::{PosturaError, Result};

/// 允许上传的照片扩展名
pub const ACCEPTED_PHOTO_EXTENSIONS: [&str; 2] = ["jpg", "jpeg"];

/// 检查上传文件名是否为 .jpg / .jpeg
pub fn is_accepted_photo(file_name: &str) -> bool {
    photo_extension(file_name).is_some()
}

fn photo_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    ACCEPTED_PHOTO_EXTENSIONS
        .contains(&ext.as_str())
        .then_some(ext)
}

/// 为上传的原图生成唯一的存储文件名
pub fn generate_upload_name(file_name: &str) -> Result<String> {
    let ext = photo_extension(file_name).ok_or_else(|| {
        PosturaError::Validation(format!("请上传 .jpg 或 .jpeg 文件: {}", file_name))
    })?;
    Ok(format!("{}.{}", Uuid::new_v4().simple(), ext))
}

/// 去掉扩展名后的文件名
pub fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
