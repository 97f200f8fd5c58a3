// 存储选项
//
// 上传开始前由调用方构建，之后不再修改

use serde::{Deserialize, Serialize};

/// 默认 MIME 类型
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// 默认存储位置
pub const DEFAULT_LOCATION: &str = "s3";

/// 存储选项（不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageOptions {
    location: String,
    region: Option<String>,
    container: Option<String>,
    path: Option<String>,
    access: Option<String>,
    filename: String,
    mimetype: String,
}

impl StorageOptions {
    pub fn builder() -> StorageOptionsBuilder {
        StorageOptionsBuilder::default()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn access(&self) -> Option<&str> {
        self.access.as_deref()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mimetype(&self) -> &str {
        &self.mimetype
    }

    /// 以 `store_*` 表单字段形式输出（未设置的可选字段不输出）
    pub fn store_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![("store_location".to_string(), self.location.clone())];
        let optional = [
            ("store_region", &self.region),
            ("store_container", &self.container),
            ("store_path", &self.path),
            ("store_access", &self.access),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                fields.push((key.to_string(), value.clone()));
            }
        }
        fields
    }
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// 存储选项构建器
#[derive(Debug, Clone, Default)]
pub struct StorageOptionsBuilder {
    location: Option<String>,
    region: Option<String>,
    container: Option<String>,
    path: Option<String>,
    access: Option<String>,
    filename: Option<String>,
    mimetype: Option<String>,
}

impl StorageOptionsBuilder {
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn access(mut self, access: impl Into<String>) -> Self {
        self.access = Some(access.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into());
        self
    }

    /// 构建存储选项
    ///
    /// 未指定时：location 为 s3，mimetype 为 application/octet-stream，
    /// filename 为 `upload-<unix 秒>`
    pub fn build(self) -> StorageOptions {
        let filename = self
            .filename
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| format!("upload-{}", chrono::Utc::now().timestamp()));

        StorageOptions {
            location: self.location.unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            region: self.region,
            container: self.container,
            path: self.path,
            access: self.access,
            filename,
            mimetype: self.mimetype.unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
        }
    }
}
