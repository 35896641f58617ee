//! 提醒展示器实现

pub mod local_file;
pub mod log;

pub use local_file::LocalFilePresenter;
pub use self::log::LogPresenter;
