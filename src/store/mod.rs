pub mod block_store;
pub mod tables;

pub use block_store::{BlockRole, BlockStore};
pub use tables::{
    BlockDetail, BlockRow, BlockTableDoc, DistributedFile, FileAttributes, FileIndexDoc,
    FileIndexEntry, SystemStats, Tables,
};
