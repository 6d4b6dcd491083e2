//! 模型 blob 存储 (按名称整体读写)

pub mod fs;
pub mod memory;

pub use self::fs::FsBlobStore;
pub use self::memory::MemoryBlobStore;

use crate::error::Result;

/// 命名 blob 键值存储
///
/// 读写都是整体完成或整体失败，不存在部分结果。
pub trait BlobStore: Send + Sync {
    /// 不存在时返回 `Ok(None)`
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>>;

    fn store(&self, name: &str, blob: &[u8]) -> Result<()>;

    /// blob 的预期位置，用于错误提示
    fn locate(&self, name: &str) -> String;
}

impl<T: BlobStore + ?Sized> BlobStore for &T {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        (**self).load(name)
    }

    fn store(&self, name: &str, blob: &[u8]) -> Result<()> {
        (**self).store(name, blob)
    }

    fn locate(&self, name: &str) -> String {
        (**self).locate(name)
    }
}
