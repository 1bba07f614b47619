use std::collections::HashMap;
use super::task::UploadTask;
use super::types::{FileSource, TaskId, TaskStatus};

/// 任务表：TaskId -> UploadTask，状态的唯一事实来源
///
/// 只被调度器 actor 持有，所有变更都经过 `update`，
/// 从而保证"先变更、后广播"的串行化约束。
pub(crate) struct TaskStore {
    tasks: HashMap<TaskId, UploadTask>,
    next_seq: u64,
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn create(&mut self, source: FileSource) -> TaskId {
        let task = UploadTask::new(source, self.next_seq);
        self.next_seq += 1;
        let id = task.id;
        self.tasks.insert(id, task);
        id
    }

    pub fn get(&self, id: TaskId) -> Option<&UploadTask> {
        self.tasks.get(&id)
    }

    /// 唯一的变更入口
    pub fn update(&mut self, id: TaskId, patch: impl FnOnce(&mut UploadTask)) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) => {
                patch(task);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: TaskId) -> Option<UploadTask> {
        self.tasks.remove(&id)
    }

    /// 按谓词批量移除，返回移除数量
    pub fn remove_where(&mut self, pred: impl Fn(&UploadTask) -> bool) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| !pred(task));
        before - self.tasks.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// 全量快照，按入队顺序排列
    pub fn all(&self) -> Vec<UploadTask> {
        let mut tasks: Vec<_> = self.tasks.values().cloned().collect();
        tasks.sort_by_key(|task| task.seq);
        tasks
    }

    pub fn iter(&self) -> impl Iterator<Item = &UploadTask> {
        self.tasks.values()
    }

    /// 按入队顺序返回符合谓词的任务 id
    pub fn ids_in_order(&self, pred: impl Fn(&UploadTask) -> bool) -> Vec<TaskId> {
        let mut hits: Vec<_> = self
            .tasks
            .values()
            .filter(|task| pred(task))
            .map(|task| (task.seq, task.id))
            .collect();
        hits.sort_by_key(|(seq, _)| *seq);
        hits.into_iter().map(|(_, id)| id).collect()
    }

    /// FIFO 选出下一个可调度任务：Pending、已有上传配置、且不在传输中
    pub fn next_eligible(&self, in_flight: impl Fn(TaskId) -> bool) -> Option<TaskId> {
        self.tasks
            .values()
            .filter(|task| {
                task.status == TaskStatus::Pending
                    && task.options.is_some()
                    && !in_flight(task.id)
            })
            .min_by_key(|task| task.seq)
            .map(|task| task.id)
    }

    /// 是否所有任务都已进入终态（空表也算）
    pub fn all_settled(&self) -> bool {
        self.tasks.values().all(|task| task.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use crate::queue::types::UploadOptions;

    fn source(name: &str, size: u64) -> FileSource {
        FileSource::from_path(PathBuf::from(name), size)
    }

    #[test]
    fn create_assigns_unique_ids_in_order() {
        let mut store = TaskStore::new();
        let a = store.create(source("a.jpg", 1));
        let b = store.create(source("b.jpg", 2));
        assert_ne!(a, b);

        let all = store.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, a);
        assert_eq!(all[1].id, b);
    }

    #[test]
    fn next_eligible_skips_tasks_without_options() {
        let mut store = TaskStore::new();
        let a = store.create(source("a.jpg", 1));
        let b = store.create(source("b.jpg", 1));
        assert!(store.next_eligible(|_| false).is_none());

        store.update(b, |t| t.options = Some(UploadOptions::new("ed-1")));
        assert_eq!(store.next_eligible(|_| false), Some(b));

        store.update(a, |t| t.options = Some(UploadOptions::new("ed-1")));
        // 两个都可调度时取先入队的
        assert_eq!(store.next_eligible(|_| false), Some(a));
        // 传输中的任务不重复调度
        assert_eq!(store.next_eligible(|id| id == a), Some(b));
    }

    #[test]
    fn remove_where_counts() {
        let mut store = TaskStore::new();
        let a = store.create(source("a.jpg", 1));
        store.create(source("b.jpg", 1));
        store.update(a, |t| t.status = TaskStatus::Completed);

        let removed = store.remove_where(|t| t.status == TaskStatus::Completed);
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn all_settled_on_empty_store() {
        let store = TaskStore::new();
        assert!(store.all_settled());
    }
}
