//! Queue and task counters for the stats surface.

use anyhow::Result;
use serde::Serialize;

use pagewise_core::queue::TaskQueue;
use pagewise_core::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub queue_length: usize,
    pub tasks_pending: u64,
    pub tasks_processing: u64,
    pub tasks_done: u64,
    pub tasks_failed: u64,
}

pub async fn collect_stats(store: &dyn RecordStore, queue: &dyn TaskQueue) -> Result<Stats> {
    let queue_length = queue.len().await?;
    let counts = store.status_counts().await?;
    Ok(Stats {
        queue_length,
        tasks_pending: counts.pending,
        tasks_processing: counts.processing,
        tasks_done: counts.done,
        tasks_failed: counts.failed,
    })
}

/// Print stats in the CLI's plain format.
pub fn print_stats(stats: &Stats) {
    println!("Pagewise Stats");
    println!("==============");
    println!();
    println!("  Queue length:  {}", stats.queue_length);
    println!("  Pending:       {}", stats.tasks_pending);
    println!("  Processing:    {}", stats.tasks_processing);
    println!("  Done:          {}", stats.tasks_done);
    println!("  Failed:        {}", stats.tasks_failed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::enqueue_url;
    use crate::queue::MemoryTaskQueue;
    use pagewise_core::models::TaskStatus;
    use pagewise_core::store::memory::InMemoryRecordStore;

    #[tokio::test]
    async fn test_counts_reflect_store_and_queue() {
        let store = InMemoryRecordStore::new();
        let queue = MemoryTaskQueue::new();
        enqueue_url(&store, &queue, "http://a.example").await.unwrap();
        enqueue_url(&store, &queue, "http://b.example").await.unwrap();
        store.set_status("old", TaskStatus::Done).await.unwrap();

        let stats = collect_stats(&store, &queue).await.unwrap();
        assert_eq!(stats.queue_length, 2);
        assert_eq!(stats.tasks_pending, 2);
        assert_eq!(stats.tasks_done, 1);
        assert_eq!(stats.tasks_failed, 0);
    }
}
