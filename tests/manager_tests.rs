#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::Value;

    use dfs_node::config::{Config, NodeInfo};
    use dfs_node::manager::{AllocError, BlockManager};
    use dfs_node::network::MessageSender;
    use dfs_node::packets::{reply_value, Ack, BlockDataReply, MessageBody, ReplyStatus};
    use dfs_node::store::{BlockRow, BlockTableDoc, FileIndexEntry, Tables};
    use dfs_node::util::md5_hex;
    use tempfile::{tempdir, TempDir};

    type Handler = Box<dyn Fn(&str, &MessageBody) -> Option<Value> + Send + Sync>;

    /// Stand-in for the transport: records outbound traffic and answers
    /// with whatever the test programs.
    struct MockSender {
        sent: Mutex<Vec<(String, MessageBody)>>,
        handler: Handler,
    }

    impl MockSender {
        fn with(
            handler: impl Fn(&str, &MessageBody) -> Option<Value> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(MockSender {
                sent: Mutex::new(Vec::new()),
                handler: Box::new(handler),
            })
        }

        /// Every peer acknowledges everything.
        fn acking() -> Arc<Self> {
            Self::with(|_, _| Some(reply_value(&Ack::ok())))
        }

        fn sent(&self) -> Vec<(String, MessageBody)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSender for MockSender {
        async fn send(&self, node: &str, body: MessageBody) -> Option<Value> {
            let reply = (self.handler)(node, &body);
            self.sent.lock().unwrap().push((node.to_string(), body));
            reply
        }

        fn statuses(&self) -> BTreeMap<String, bool> {
            BTreeMap::new()
        }
    }

    fn test_config(shared_dir: &Path, block_size: usize, caps: &[(&str, u64)]) -> Arc<Config> {
        Arc::new(Config {
            this_node: "node1".to_string(),
            network_port: 9400,
            block_size,
            heartbeat_interval: 3,
            node_timeout: 8,
            shared_dir: shared_dir.to_path_buf(),
            nodes: caps
                .iter()
                .enumerate()
                .map(|(i, (name, capacity_mb))| NodeInfo {
                    name: name.to_string(),
                    ip: format!("127.0.0.{}", i + 1),
                    port: 8080,
                    capacity_mb: *capacity_mb,
                })
                .collect(),
        })
    }

    fn manager_with(
        block_size: usize,
        caps: &[(&str, u64)],
        sender: Arc<MockSender>,
    ) -> (TempDir, Arc<Config>, BlockManager) {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), block_size, caps);
        let manager = BlockManager::new(Arc::clone(&config), sender);
        (dir, config, manager)
    }

    async fn write_temp_file(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    // ==================== split ====================

    #[tokio::test]
    async fn test_split_two_block_file() {
        let sender = MockSender::acking();
        let (dir, _, manager) =
            manager_with(1024 * 1024, &[("node1", 70), ("node2", 50)], sender);

        let contents = vec![7u8; 1_572_864];
        let path = write_temp_file(&dir, "big.bin", &contents).await;

        let (blocks, file_id) = manager.split_file(&path, "big.bin").await.unwrap();
        assert_eq!(file_id.len(), 12);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].size, 1_048_576);
        assert_eq!(blocks[1].size, 524_288);
        assert_eq!(blocks[0].block_id, format!("{}_block_0", file_id));
        assert_eq!(blocks[1].block_id, format!("{}_block_1", file_id));
        assert_eq!(blocks[0].hash, md5_hex(&contents[..1_048_576]));
        assert_eq!(blocks[1].hash, md5_hex(&contents[1_048_576..]));
    }

    #[tokio::test]
    async fn test_split_empty_file_yields_one_block() {
        let sender = MockSender::acking();
        let (dir, _, manager) =
            manager_with(1024 * 1024, &[("node1", 70), ("node2", 50)], sender);

        let path = write_temp_file(&dir, "empty.txt", b"").await;
        let (blocks, _) = manager.split_file(&path, "empty.txt").await.unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].size, 0);
        assert_eq!(blocks[0].hash, md5_hex(b""));
    }

    // ==================== allocate ====================

    #[tokio::test]
    async fn test_allocate_keeps_primary_and_replica_apart() {
        let sender = MockSender::acking();
        let (dir, config, manager) = manager_with(
            1024,
            &[("node1", 70), ("node2", 50), ("node3", 100)],
            sender,
        );

        let path = write_temp_file(&dir, "f.bin", &vec![1u8; 3 * 1024]).await;
        let (blocks, _) = manager.split_file(&path, "f.bin").await.unwrap();
        let placed = manager.allocate(blocks, "f.bin").await.unwrap();

        assert_eq!(placed.len(), 3);
        for pb in &placed {
            assert_ne!(pb.primary_node, pb.replica_node);
        }

        // One megabyte charged per block per side.
        let table = manager.block_table().await;
        let total_usage: u64 = table.node_usage.values().sum();
        assert_eq!(total_usage, 6);
        assert_eq!(table.blocks.len(), 3);
        for row in table.blocks.values() {
            assert_eq!(row.status, "allocated");
        }

        // The table was persisted in one rewrite.
        let reloaded = Tables::load(&config);
        assert_eq!(reloaded.block_table.blocks.len(), 3);
    }

    #[tokio::test]
    async fn test_allocate_prefers_most_free_space() {
        let sender = MockSender::acking();
        let (dir, _, manager) = manager_with(
            1024,
            &[("node1", 10), ("node2", 20), ("node3", 100)],
            sender,
        );

        let path = write_temp_file(&dir, "f.bin", &vec![1u8; 1024]).await;
        let (blocks, _) = manager.split_file(&path, "f.bin").await.unwrap();
        let placed = manager.allocate(blocks, "f.bin").await.unwrap();

        assert_eq!(placed[0].primary_node, "node3");
        assert_eq!(placed[0].replica_node, "node2");
    }

    #[tokio::test]
    async fn test_allocate_ties_follow_directory_order() {
        let sender = MockSender::acking();
        let (dir, _, manager) =
            manager_with(1024, &[("node1", 10), ("node2", 10)], sender);

        let path = write_temp_file(&dir, "f.bin", &vec![1u8; 1024]).await;
        let (blocks, _) = manager.split_file(&path, "f.bin").await.unwrap();
        let placed = manager.allocate(blocks, "f.bin").await.unwrap();

        assert_eq!(placed[0].primary_node, "node1");
        assert_eq!(placed[0].replica_node, "node2");
    }

    #[tokio::test]
    async fn test_allocate_capacity_exhaustion_is_atomic() {
        let sender = MockSender::acking();
        let (dir, config, manager) =
            manager_with(1024, &[("node1", 2), ("node2", 2), ("node3", 0)], sender);

        let path = write_temp_file(&dir, "f.bin", &vec![1u8; 3 * 1024]).await;
        let (blocks, _) = manager.split_file(&path, "f.bin").await.unwrap();

        match manager.allocate(blocks, "f.bin").await {
            Err(AllocError::InsufficientReplicas) => {}
            other => panic!("expected InsufficientReplicas, got {:?}", other.map(|p| p.len())),
        }

        // Nothing persisted, nothing charged.
        let table = manager.block_table().await;
        assert!(table.blocks.is_empty());
        assert!(table.node_usage.values().all(|used| *used == 0));
        let reloaded = Tables::load(&config);
        assert!(reloaded.block_table.blocks.is_empty());
    }

    // ==================== distribute ====================

    #[tokio::test]
    async fn test_distribute_writes_local_and_ships_remote() {
        let sender = MockSender::acking();
        let (dir, _, manager) = manager_with(
            1024,
            &[("node1", 10), ("node2", 10)],
            Arc::clone(&sender),
        );

        let contents = vec![9u8; 2 * 1024];
        let path = write_temp_file(&dir, "two.bin", &contents).await;
        let (blocks, file_id) = manager.split_file(&path, "two.bin").await.unwrap();
        let placed = manager.allocate(blocks, "two.bin").await.unwrap();

        assert!(manager.distribute(&placed, &file_id, "two.bin").await);

        // Local sides landed on disk.
        for pb in &placed {
            assert!(manager.read_block_local(&pb.block.block_id).await.is_some());
        }

        // Remote sides went out as store_block messages.
        let sent = sender.sent();
        let store_msgs: Vec<_> = sent
            .iter()
            .filter(|(node, body)| {
                node == "node2" && matches!(body, MessageBody::StoreBlock { .. })
            })
            .collect();
        assert_eq!(store_msgs.len(), 2);
        for (_, body) in store_msgs {
            if let MessageBody::StoreBlock { is_replica, .. } = body {
                assert!(is_replica, "node2 holds the replica side here");
            }
        }

        let index = manager.file_index().await;
        let entry = &index[&file_id];
        assert_eq!(entry.total_blocks, 2);
        assert_eq!(entry.size, 2 * 1024);
        assert_eq!(
            entry.block_ids,
            vec![
                format!("{}_block_0", file_id),
                format!("{}_block_1", file_id)
            ]
        );
    }

    #[tokio::test]
    async fn test_distribute_reports_failure_but_keeps_index() {
        // The remote peer is down; sends return nothing.
        let sender = MockSender::with(|_, _| None);
        let (dir, _, manager) =
            manager_with(1024, &[("node1", 10), ("node2", 10)], Arc::clone(&sender));

        let path = write_temp_file(&dir, "f.bin", &vec![1u8; 1024]).await;
        let (blocks, file_id) = manager.split_file(&path, "f.bin").await.unwrap();
        let placed = manager.allocate(blocks, "f.bin").await.unwrap();

        assert!(!manager.distribute(&placed, &file_id, "f.bin").await);
        // The row is still written; the user retries by re-uploading.
        assert!(manager.file_index().await.contains_key(&file_id));
    }

    // ==================== reconstruct ====================

    #[tokio::test]
    async fn test_reconstruct_prefers_local_disk() {
        let sender = MockSender::acking();
        let (dir, _, manager) =
            manager_with(1024, &[("node1", 10), ("node2", 10)], Arc::clone(&sender));

        let contents: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
        let path = write_temp_file(&dir, "data.bin", &contents).await;
        let (blocks, file_id) = manager.split_file(&path, "data.bin").await.unwrap();
        let placed = manager.allocate(blocks, "data.bin").await.unwrap();
        manager.distribute(&placed, &file_id, "data.bin").await;

        let (restored, name) = manager.reconstruct(&file_id).await.unwrap();
        assert_eq!(restored, contents);
        assert_eq!(name, "data.bin");

        // Every block was on the local disk; nothing was fetched.
        assert!(!sender
            .sent()
            .iter()
            .any(|(_, body)| matches!(body, MessageBody::GetBlock { .. })));
    }

    fn seed_tables(config: &Config, rows: Vec<BlockRow>, index: Vec<(&str, FileIndexEntry)>) {
        let mut table = BlockTableDoc::default();
        for row in rows {
            table.blocks.insert(row.block_id.clone(), row);
        }
        std::fs::write(
            config.block_table_file(),
            serde_json::to_string_pretty(&table).unwrap(),
        )
        .unwrap();

        let index: BTreeMap<String, FileIndexEntry> = index
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        std::fs::write(
            config.file_index_file(),
            serde_json::to_string_pretty(&index).unwrap(),
        )
        .unwrap();
    }

    fn row(block_id: &str, file_id: &str, payload: &[u8], primary: &str, replica: &str) -> BlockRow {
        BlockRow {
            block_id: block_id.to_string(),
            block_num: 0,
            file_id: file_id.to_string(),
            original_filename: "remote.bin".to_string(),
            size: payload.len(),
            hash: md5_hex(payload),
            primary_node: primary.to_string(),
            replica_node: replica.to_string(),
            status: "allocated".to_string(),
            created_at: 1.0,
        }
    }

    #[tokio::test]
    async fn test_reconstruct_fails_over_to_replica() {
        let payload = b"failover payload".to_vec();
        let payload_b64 = base64::encode(&payload);

        // node2 (primary) is down, node3 (replica) answers.
        let sender = MockSender::with(move |node, body| match (node, body) {
            ("node3", MessageBody::GetBlock { .. }) => Some(reply_value(&BlockDataReply {
                status: ReplyStatus::Ok,
                block_data: Some(payload_b64.clone()),
                message: None,
            })),
            _ => None,
        });

        let dir = tempdir().unwrap();
        let config = test_config(
            dir.path(),
            1024,
            &[("node1", 10), ("node2", 10), ("node3", 10)],
        );
        seed_tables(
            &config,
            vec![row("rf_block_0", "rf", &payload, "node2", "node3")],
            vec![(
                "rf",
                FileIndexEntry {
                    original_filename: "remote.bin".to_string(),
                    block_ids: vec!["rf_block_0".to_string()],
                    total_blocks: 1,
                    created_at: 1.0,
                    size: payload.len() as u64,
                },
            )],
        );
        let manager = BlockManager::new(Arc::clone(&config), sender.clone());

        let (restored, _) = manager.reconstruct("rf").await.unwrap();
        assert_eq!(restored, payload);

        // Primary first, replica second.
        let attempts: Vec<String> = sender
            .sent()
            .into_iter()
            .filter(|(_, body)| matches!(body, MessageBody::GetBlock { .. }))
            .map(|(node, _)| node)
            .collect();
        assert_eq!(attempts, vec!["node2", "node3"]);
    }

    #[tokio::test]
    async fn test_reconstruct_missing_block_fails_whole_file() {
        let sender = MockSender::with(|_, _| None);
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), 1024, &[("node1", 10), ("node2", 10)]);
        seed_tables(
            &config,
            vec![],
            vec![(
                "ghost",
                FileIndexEntry {
                    original_filename: "ghost.bin".to_string(),
                    block_ids: vec!["ghost_block_0".to_string()],
                    total_blocks: 1,
                    created_at: 1.0,
                    size: 4,
                },
            )],
        );
        let manager = BlockManager::new(Arc::clone(&config), sender);

        assert!(manager.reconstruct("ghost").await.is_none());
        assert!(manager.reconstruct("never-indexed").await.is_none());
    }

    // ==================== delete & orphans ====================

    #[tokio::test]
    async fn test_delete_file_clears_everything() {
        let sender = MockSender::acking();
        let (dir, config, manager) =
            manager_with(1024, &[("node1", 10), ("node2", 10)], Arc::clone(&sender));

        let path = write_temp_file(&dir, "del.bin", &vec![3u8; 2 * 1024]).await;
        let (blocks, file_id) = manager.split_file(&path, "del.bin").await.unwrap();
        let placed = manager.allocate(blocks, "del.bin").await.unwrap();
        manager.distribute(&placed, &file_id, "del.bin").await;

        assert!(manager.delete_file(&file_id).await);

        let table = manager.block_table().await;
        assert!(table.blocks.is_empty());
        assert!(table.node_usage.values().all(|used| *used == 0));
        assert!(manager.file_index().await.is_empty());
        for pb in &placed {
            assert!(manager.read_block_local(&pb.block.block_id).await.is_none());
        }

        // The remote sides got delete_block messages.
        let deletes: Vec<_> = sender
            .sent()
            .into_iter()
            .filter(|(node, body)| {
                node == "node2" && matches!(body, MessageBody::DeleteBlock { .. })
            })
            .collect();
        assert_eq!(deletes.len(), 2);

        // Everything was persisted.
        let reloaded = Tables::load(&config);
        assert!(reloaded.block_table.blocks.is_empty());
        assert!(reloaded.file_index.is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_file_is_false() {
        let sender = MockSender::acking();
        let (_dir, _, manager) =
            manager_with(1024, &[("node1", 10), ("node2", 10)], sender);
        assert!(!manager.delete_file("nope").await);
    }

    #[tokio::test]
    async fn test_orphan_sweep_removes_rows_and_broadcasts() {
        let sender = MockSender::acking();
        let dir = tempdir().unwrap();
        let config = test_config(
            dir.path(),
            1024,
            &[("node1", 10), ("node2", 10), ("node3", 10)],
        );

        let payload = b"orphaned".to_vec();
        seed_tables(
            &config,
            vec![row("gh_block_0", "gh", &payload, "node1", "node2")],
            vec![],
        );
        let manager = BlockManager::new(Arc::clone(&config), sender.clone());
        manager.store_block_local("gh_block_0", &payload, false).await;

        let swept = manager.cleanup_orphans().await;
        assert_eq!(swept, vec!["gh".to_string()]);
        assert!(manager.block_table().await.blocks.is_empty());
        assert!(manager.read_block_local("gh_block_0").await.is_none());

        let sent = sender.sent();
        // The replica host is asked to drop its payload.
        assert!(sent.iter().any(|(node, body)| node == "node2"
            && matches!(body, MessageBody::DeleteBlock { .. })));
        // And every other peer hears about the orphaned file ids.
        let broadcasts: Vec<&String> = sent
            .iter()
            .filter(|(_, body)| matches!(body, MessageBody::CleanupOrphanBlocks { .. }))
            .map(|(node, _)| node)
            .collect();
        assert_eq!(broadcasts.len(), 2);
    }

    #[tokio::test]
    async fn test_orphan_broadcast_handler_cleans_local_copies() {
        let sender = MockSender::acking();
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), 1024, &[("node1", 10), ("node2", 10)]);

        let payload = b"copy".to_vec();
        seed_tables(
            &config,
            vec![row("gh_block_0", "gh", &payload, "node2", "node1")],
            vec![],
        );
        let manager = BlockManager::new(Arc::clone(&config), sender);
        manager.store_block_local("gh_block_0", &payload, true).await;

        let removed = manager.remove_orphan_blocks(&["gh".to_string()]).await;
        assert_eq!(removed, 1);
        assert!(manager.block_table().await.blocks.is_empty());
        assert!(manager.read_block_local("gh_block_0").await.is_none());
    }

    // ==================== stats & attributes ====================

    #[tokio::test]
    async fn test_stats_and_attributes() {
        let sender = MockSender::acking();
        let (dir, _, manager) =
            manager_with(1024, &[("node1", 10), ("node2", 20)], sender);

        let path = write_temp_file(&dir, "s.bin", &vec![5u8; 1500]).await;
        let (blocks, file_id) = manager.split_file(&path, "s.bin").await.unwrap();
        let placed = manager.allocate(blocks, "s.bin").await.unwrap();
        manager.distribute(&placed, &file_id, "s.bin").await;

        let stats = manager.system_stats().await;
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.total_blocks, 2);
        assert_eq!(stats.node_capacity["node2"], 20);
        assert_eq!(
            stats.node_free_space["node2"],
            20 - stats.node_usage["node2"] as i64
        );

        let attrs = manager.file_attributes(&file_id).await.unwrap();
        assert_eq!(attrs.total_blocks, 2);
        assert_eq!(attrs.size, 1500);
        assert_eq!(attrs.blocks_detail.len(), 2);
        assert_eq!(attrs.blocks_detail[1].size, 1500 - 1024);

        assert!(manager.file_attributes("missing").await.is_none());

        let files = manager.all_files().await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_id, file_id);
        assert_eq!(files[0].filename, "s.bin");
    }
}
