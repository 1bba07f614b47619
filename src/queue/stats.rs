use std::time::{Duration, Instant};
use super::store::TaskStore;
use super::types::{QueueStats, TaskStatus};

/// 对任务表做一次 O(n) 投影
pub(crate) fn compute_stats(store: &TaskStore, average_speed: f64) -> QueueStats {
    let mut stats = QueueStats {
        average_speed,
        ..QueueStats::default()
    };

    for task in store.iter() {
        stats.total += 1;
        stats.total_bytes += task.total_bytes;
        stats.uploaded_bytes += task.uploaded_bytes;

        match task.status {
            TaskStatus::Pending => stats.pending += 1,
            TaskStatus::Uploading => stats.uploading += 1,
            TaskStatus::Paused => stats.paused += 1,
            TaskStatus::Completed => stats.completed += 1,
            TaskStatus::Failed => stats.failed += 1,
            TaskStatus::Cancelled => stats.cancelled += 1,
        }
    }

    stats
}

/// 近窗口速度估计（环形缓冲区）
///
/// 样本是 (时刻, 累计字节) 对，速度取窗口内最新与最旧样本的差商，
/// 所以反映的是当前网速而不是整个生命周期的平均值。
/// 任务被移除不会让累计值回退：这里累计的是增量而不是任务表的合计。
pub(crate) struct SpeedEstimator {
    samples: Vec<SpeedSample>,
    write_index: usize,
    sample_count: usize,
    max_samples: usize,
    window: Duration,
    cumulative: u64,
}

#[derive(Clone, Copy, Debug)]
struct SpeedSample {
    bytes_total: u64,
    timestamp: Instant,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(10))
    }

    pub fn with_window(window: Duration) -> Self {
        let max_samples = 32;
        Self {
            samples: vec![
                SpeedSample {
                    bytes_total: 0,
                    timestamp: Instant::now(),
                };
                max_samples
            ],
            write_index: 0,
            sample_count: 0,
            max_samples,
            window,
            cumulative: 0,
        }
    }

    /// 记录一次增量（某个任务新确认的字节数）
    pub fn record(&mut self, delta: u64) {
        if delta == 0 {
            return;
        }
        self.cumulative += delta;
        self.samples[self.write_index] = SpeedSample {
            bytes_total: self.cumulative,
            timestamp: Instant::now(),
        };
        self.write_index = (self.write_index + 1) % self.max_samples;
        self.sample_count = self.sample_count.saturating_add(1).min(self.max_samples);
    }

    /// 当前速度（字节/秒）；样本不足或窗口内无数据时为 0
    pub fn current(&self) -> f64 {
        if self.sample_count < 2 {
            return 0.0;
        }

        let now = Instant::now();
        let newest_idx = (self.write_index + self.max_samples - 1) % self.max_samples;
        let newest = self.samples[newest_idx];

        // 最新样本已经掉出窗口，说明这段时间没有任何进度
        if now.duration_since(newest.timestamp) > self.window {
            return 0.0;
        }

        // 从最旧往最新找第一个仍在窗口内的样本
        let mut oldest = newest;
        for i in 1..self.sample_count {
            let idx = (newest_idx + self.max_samples - i) % self.max_samples;
            let sample = self.samples[idx];
            if now.duration_since(sample.timestamp) > self.window {
                break;
            }
            oldest = sample;
        }

        if newest.timestamp <= oldest.timestamp {
            return 0.0;
        }

        let bytes_diff = newest.bytes_total.saturating_sub(oldest.bytes_total);
        let time_diff = newest.timestamp.duration_since(oldest.timestamp).as_secs_f64();
        if time_diff > 0.0 {
            bytes_diff as f64 / time_diff
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use crate::queue::types::FileSource;

    #[test]
    fn stats_counts_and_bytes() {
        let mut store = TaskStore::new();
        let a = store.create(FileSource::from_path(PathBuf::from("a.mp4"), 100));
        let b = store.create(FileSource::from_path(PathBuf::from("b.mp4"), 50));
        store.create(FileSource::from_path(PathBuf::from("c.mp4"), 25));

        store.update(a, |t| {
            t.status = TaskStatus::Uploading;
            t.set_uploaded(40);
        });
        store.update(b, |t| t.status = TaskStatus::Failed);

        let stats = compute_stats(&store, 0.0);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.uploading, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.total_bytes, 175);
        assert_eq!(stats.uploaded_bytes, 40);
    }

    #[test]
    fn estimator_needs_two_samples() {
        let mut est = SpeedEstimator::new();
        assert_eq!(est.current(), 0.0);
        est.record(1000);
        assert_eq!(est.current(), 0.0);
    }

    #[tokio::test]
    async fn estimator_tracks_recent_rate() {
        let mut est = SpeedEstimator::with_window(Duration::from_secs(5));
        est.record(1000);
        tokio::time::sleep(Duration::from_millis(50)).await;
        est.record(1000);
        tokio::time::sleep(Duration::from_millis(50)).await;
        est.record(1000);

        let speed = est.current();
        // 100ms 内传了 2000 字节，速度应当在 20KB/s 附近
        assert!(speed > 5_000.0, "speed too low: {speed}");
        assert!(speed < 100_000.0, "speed too high: {speed}");
    }

    #[tokio::test]
    async fn estimator_goes_idle_after_window() {
        let mut est = SpeedEstimator::with_window(Duration::from_millis(40));
        est.record(1000);
        est.record(1000);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(est.current(), 0.0);
    }
}
