use std::path::Path;

use tokio::io::AsyncReadExt;

use super::{Block, BlockManager};
use crate::util::{md5_hex, now_ts};

impl BlockManager {
    /// Splits a file into `block_size` chunks. An empty file still yields
    /// one empty block so the file round-trips. Returns the blocks and the
    /// file id minted for this upload.
    pub async fn split_file(
        &self,
        path: &Path,
        original_name: &str,
    ) -> std::io::Result<(Vec<Block>, String)> {
        let block_size = self.config.block_size as u64;
        let mut file = tokio::fs::File::open(path).await?;
        let file_size = file.metadata().await?.len();

        let mut total_blocks = (file_size + block_size - 1) / block_size;
        if total_blocks == 0 {
            total_blocks = 1;
        }

        let file_id = self.generate_file_id(original_name);
        let mut blocks = Vec::with_capacity(total_blocks as usize);

        for block_num in 0..total_blocks {
            let remaining = file_size - block_num * block_size;
            let mut data = vec![0u8; remaining.min(block_size) as usize];
            file.read_exact(&mut data).await?;

            blocks.push(Block {
                block_id: format!("{}_block_{}", file_id, block_num),
                block_num: block_num as usize,
                file_id: file_id.clone(),
                original_filename: original_name.to_string(),
                size: data.len(),
                hash: md5_hex(&data),
                data,
            });
        }

        Ok((blocks, file_id))
    }

    /// File ids are the first 12 hex characters of
    /// md5("<name>_<timestamp>_<creator>"), unique enough per upload and
    /// stable for its lifetime.
    fn generate_file_id(&self, original_name: &str) -> String {
        let unique = format!("{}_{}_{}", original_name, now_ts(), self.config.this_node);
        md5_hex(unique.as_bytes())[..12].to_string()
    }
}
