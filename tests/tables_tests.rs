#[cfg(test)]
mod tests {
    use std::path::Path;

    use dfs_node::config::{Config, NodeInfo};
    use dfs_node::store::{BlockRow, BlockTableDoc, FileIndexEntry, Tables};
    use tempfile::tempdir;

    fn test_config(shared_dir: &Path) -> Config {
        Config {
            this_node: "node1".to_string(),
            network_port: 9400,
            block_size: 1024 * 1024,
            heartbeat_interval: 3,
            node_timeout: 8,
            shared_dir: shared_dir.to_path_buf(),
            nodes: vec![
                NodeInfo {
                    name: "node1".to_string(),
                    ip: "127.0.0.1".to_string(),
                    port: 8080,
                    capacity_mb: 70,
                },
                NodeInfo {
                    name: "node2".to_string(),
                    ip: "127.0.0.2".to_string(),
                    port: 8080,
                    capacity_mb: 50,
                },
            ],
        }
    }

    fn row(block_id: &str, file_id: &str) -> BlockRow {
        BlockRow {
            block_id: block_id.to_string(),
            block_num: 0,
            file_id: file_id.to_string(),
            original_filename: "a.txt".to_string(),
            size: 10,
            hash: "0123".to_string(),
            primary_node: "node1".to_string(),
            replica_node: "node2".to_string(),
            status: "allocated".to_string(),
            created_at: 1.0,
        }
    }

    fn entry(block_ids: Vec<&str>) -> FileIndexEntry {
        FileIndexEntry {
            original_filename: "a.txt".to_string(),
            block_ids: block_ids.into_iter().map(str::to_string).collect(),
            total_blocks: 1,
            created_at: 1.0,
            size: 10,
        }
    }

    #[test]
    fn test_fresh_tables_seed_usage() {
        let dir = tempdir().unwrap();
        let tables = Tables::load(&test_config(dir.path()));

        assert!(tables.block_table.blocks.is_empty());
        assert_eq!(tables.usage_of("node1"), 0);
        assert_eq!(tables.usage_of("node2"), 0);
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let mut tables = Tables::load(&config);
        tables
            .block_table
            .blocks
            .insert("f1_block_0".to_string(), row("f1_block_0", "f1"));
        tables.charge("node1", 1);
        tables.charge("node2", 1);
        tables
            .file_index
            .insert("f1".to_string(), entry(vec!["f1_block_0"]));
        tables.save_block_table();
        tables.save_file_index();

        let reloaded = Tables::load(&config);
        assert_eq!(reloaded.block_table, tables.block_table);
        assert_eq!(reloaded.file_index, tables.file_index);
        assert_eq!(reloaded.usage_of("node1"), 1);
    }

    #[test]
    fn test_corrupt_documents_reset_to_empty() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::write(config.block_table_file(), "{not json").unwrap();
        std::fs::write(config.file_index_file(), "]").unwrap();

        let tables = Tables::load(&config);
        assert!(tables.block_table.blocks.is_empty());
        assert!(tables.file_index.is_empty());
    }

    #[test]
    fn test_merge_keeps_local_rows() {
        let dir = tempdir().unwrap();
        let mut tables = Tables::load(&test_config(dir.path()));

        let mut local_row = row("f1_block_0", "f1");
        local_row.primary_node = "node1".to_string();
        tables
            .block_table
            .blocks
            .insert("f1_block_0".to_string(), local_row.clone());

        let mut remote = BlockTableDoc::default();
        let mut conflicting = row("f1_block_0", "f1");
        conflicting.primary_node = "node2".to_string();
        remote
            .blocks
            .insert("f1_block_0".to_string(), conflicting);
        remote
            .blocks
            .insert("f2_block_0".to_string(), row("f2_block_0", "f2"));

        let added = tables.merge_block_table(remote);
        assert_eq!(added, 1);
        assert_eq!(
            tables.block_table.blocks["f1_block_0"].primary_node,
            "node1"
        );
        assert!(tables.block_table.blocks.contains_key("f2_block_0"));
    }

    #[test]
    fn test_merge_file_index_is_union() {
        let dir = tempdir().unwrap();
        let mut tables = Tables::load(&test_config(dir.path()));
        tables
            .file_index
            .insert("f1".to_string(), entry(vec!["f1_block_0"]));

        let mut remote = dfs_node::store::FileIndexDoc::default();
        remote.insert("f2".to_string(), entry(vec!["f2_block_0"]));
        remote.insert("f1".to_string(), entry(vec!["ignored"]));

        let added = tables.merge_file_index(remote);
        assert_eq!(added, 1);
        assert_eq!(tables.file_index["f1"].block_ids, vec!["f1_block_0"]);
    }

    #[test]
    fn test_usage_floor_is_zero() {
        let dir = tempdir().unwrap();
        let mut tables = Tables::load(&test_config(dir.path()));
        tables.charge("node1", 1);
        tables.discharge("node1", 1);
        tables.discharge("node1", 1);
        assert_eq!(tables.usage_of("node1"), 0);
    }

    #[test]
    fn test_orphan_rows_are_detected() {
        let dir = tempdir().unwrap();
        let mut tables = Tables::load(&test_config(dir.path()));

        tables
            .block_table
            .blocks
            .insert("live_block_0".to_string(), row("live_block_0", "live"));
        tables
            .file_index
            .insert("live".to_string(), entry(vec!["live_block_0"]));
        tables
            .block_table
            .blocks
            .insert("ghost_block_0".to_string(), row("ghost_block_0", "ghost"));

        let orphans = tables.orphan_rows();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].block_id, "ghost_block_0");
    }
}
