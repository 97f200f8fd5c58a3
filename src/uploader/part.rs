// 上传分片管理
//
// 分片登记表同时充当工作队列：
// - 初始按分片大小切分 [0, size)
// - 智能模式下失败的分片会被对半拆分，两半重新入队
// - 所有记录始终连续、不重叠，长度之和等于文件大小

use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info};

/// 分片状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartStatus {
    /// 等待上传
    Pending,
    /// 正在上传（防止重复调度）
    InFlight,
    /// 已提交
    Committed,
    /// 失败
    Failed,
}

/// 上传分片信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
    /// 分片序号（从 1 开始，拆分出的两半沿用原序号）
    pub part: u32,
    /// 在文件中的起始字节
    pub offset: u64,
    /// 字节数
    pub length: u64,
    /// 在所属分片内的偏移（拆分后非 0）
    pub part_offset: u64,
    /// 拆分代数（初始为 0）
    pub generation: u32,
    /// 分片 MD5（base64）
    pub md5: Option<String>,
    /// 状态
    pub status: PartStatus,
    /// 重试次数
    pub retries: u32,
    /// 存储端返回的 ETag
    pub etag: Option<String>,
}

impl PartRecord {
    pub fn new(part: u32, offset: u64, length: u64) -> Self {
        Self {
            part,
            offset,
            length,
            part_offset: 0,
            generation: 0,
            md5: None,
            status: PartStatus::Pending,
            retries: 0,
            etag: None,
        }
    }

    /// 结束位置（不含）
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// 拆分限制
#[derive(Debug, Clone, Copy)]
pub struct SplitLimits {
    /// 拆分后每一半的最小字节数
    pub min_part_size: u64,
    /// 最多拆分代数
    pub max_generations: u32,
}

/// 分片登记表
#[derive(Debug)]
pub struct PartRegistry {
    /// 所有分片（按文件偏移排序）
    records: BTreeMap<u64, PartRecord>,
    /// 待上传队列（存放分片偏移）
    queue: VecDeque<u64>,
    /// 文件总大小
    total_size: u64,
    /// 初始分片大小
    part_size: u64,
}

impl PartRegistry {
    /// 按固定分片大小规划
    ///
    /// 生成 ceil(total_size / part_size) 个连续分片
    pub fn plan(total_size: u64, part_size: u64) -> Self {
        let part_size = part_size.max(1);
        let mut records = BTreeMap::new();
        let mut queue = VecDeque::new();
        let mut offset = 0u64;
        let mut part = 1u32;

        while offset < total_size {
            let end = std::cmp::min(offset + part_size, total_size);
            records.insert(offset, PartRecord::new(part, offset, end - offset));
            queue.push_back(offset);
            offset = end;
            part += 1;
        }

        info!(
            "规划上传分片: 文件大小={} bytes, 分片大小={} bytes, 分片数量={}",
            total_size,
            part_size,
            records.len()
        );

        Self {
            records,
            queue,
            total_size,
            part_size,
        }
    }

    /// 取出下一个待上传分片，并标记为上传中
    pub fn next_pending(&mut self) -> Option<PartRecord> {
        while let Some(offset) = self.queue.pop_front() {
            if let Some(record) = self.records.get_mut(&offset) {
                if record.status == PartStatus::Pending {
                    record.status = PartStatus::InFlight;
                    return Some(record.clone());
                }
            }
        }
        None
    }

    /// 放回队首（未能启动上传时调用）
    pub fn unmark_in_flight(&mut self, offset: u64) {
        if let Some(record) = self.records.get_mut(&offset) {
            if record.status == PartStatus::InFlight {
                record.status = PartStatus::Pending;
                self.queue.push_front(offset);
            }
        }
    }

    /// 记录分片 MD5
    pub fn set_md5(&mut self, offset: u64, md5: String) {
        if let Some(record) = self.records.get_mut(&offset) {
            record.md5 = Some(md5);
        }
    }

    /// 增加分片重试次数
    pub fn increment_retry(&mut self, offset: u64) -> u32 {
        if let Some(record) = self.records.get_mut(&offset) {
            record.retries += 1;
            record.retries
        } else {
            0
        }
    }

    /// 标记分片已提交
    pub fn mark_committed(&mut self, offset: u64, etag: Option<String>) {
        if let Some(record) = self.records.get_mut(&offset) {
            record.status = PartStatus::Committed;
            record.etag = etag;
        }
    }

    /// 标记分片失败
    pub fn mark_failed(&mut self, offset: u64) {
        if let Some(record) = self.records.get_mut(&offset) {
            record.status = PartStatus::Failed;
        }
    }

    /// 对半拆分分片，两半以新的重试预算放回队首
    ///
    /// 拆分代数达到上限或任一半小于最小分片大小时返回 None，分片保持原状
    pub fn split(&mut self, offset: u64, limits: SplitLimits) -> Option<(PartRecord, PartRecord)> {
        let original = self.records.get(&offset)?;
        if original.generation >= limits.max_generations {
            return None;
        }
        let first_len = original.length / 2;
        let second_len = original.length - first_len;
        if first_len < limits.min_part_size.max(1) {
            return None;
        }

        let original = self.records.remove(&offset)?;
        let mut first = PartRecord::new(original.part, original.offset, first_len);
        first.part_offset = original.part_offset;
        first.generation = original.generation + 1;

        let mut second = PartRecord::new(original.part, original.offset + first_len, second_len);
        second.part_offset = original.part_offset + first_len;
        second.generation = original.generation + 1;

        self.records.insert(first.offset, first.clone());
        self.records.insert(second.offset, second.clone());
        self.queue.push_front(second.offset);
        self.queue.push_front(first.offset);

        debug!(
            "拆分分片 #{}: offset={}, {} bytes -> {} + {} bytes (第 {} 代)",
            original.part, original.offset, original.length, first_len, second_len, first.generation
        );

        Some((first, second))
    }

    /// 获取所有分片（按偏移排序）
    pub fn records(&self) -> impl Iterator<Item = &PartRecord> {
        self.records.values()
    }

    /// 获取分片
    pub fn get(&self, offset: u64) -> Option<&PartRecord> {
        self.records.get(&offset)
    }

    /// 获取分片数量
    pub fn part_count(&self) -> usize {
        self.records.len()
    }

    /// 获取已提交的分片数量
    pub fn committed_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.status == PartStatus::Committed)
            .count()
    }

    /// 获取已提交的字节数
    pub fn committed_bytes(&self) -> u64 {
        self.records
            .values()
            .filter(|r| r.status == PartStatus::Committed)
            .map(|r| r.length)
            .sum()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// 是否全部提交
    pub fn is_completed(&self) -> bool {
        self.records
            .values()
            .all(|r| r.status == PartStatus::Committed)
    }

    /// 分片是否连续覆盖 [0, total_size)
    pub fn is_contiguous(&self) -> bool {
        let mut expected = 0u64;
        for record in self.records.values() {
            if record.offset != expected || record.length == 0 {
                return false;
            }
            expected = record.end();
        }
        expected == self.total_size
    }

    /// 普通模式 complete 所需的 ETag 列表（`1:etag;2:etag`，按分片序号排列）
    ///
    /// 任一分片缺少 ETag 时返回 `None`
    pub fn etag_list(&self) -> Option<String> {
        self.records
            .values()
            .map(|r| match r.etag.as_deref() {
                Some(etag) if !etag.is_empty() => Some(format!("{}:{}", r.part, etag)),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(|tags| tags.join(";"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MB: u64 = 1024 * 1024;

    fn limits() -> SplitLimits {
        SplitLimits {
            min_part_size: 32 * 1024,
            max_generations: 2,
        }
    }

    #[test]
    fn test_part_creation() {
        let part = PartRecord::new(1, 0, 1024);
        assert_eq!(part.part, 1);
        assert_eq!(part.end(), 1024);
        assert_eq!(part.status, PartStatus::Pending);
        assert_eq!(part.retries, 0);
    }

    #[test]
    fn test_plan_calculation() {
        // 测试完整分片
        let registry = PartRegistry::plan(16 * MB, 4 * MB);
        assert_eq!(registry.part_count(), 4);
        let parts: Vec<_> = registry.records().cloned().collect();
        assert_eq!(parts[0].part, 1);
        assert_eq!(parts[3].offset, 12 * MB);
        assert_eq!(parts[3].part, 4);

        // 测试不完整分片
        let registry = PartRegistry::plan(17 * MB, 4 * MB);
        assert_eq!(registry.part_count(), 5);
        let last = registry.records().last().unwrap();
        assert_eq!(last.length, MB);
        assert!(registry.is_contiguous());
    }

    #[test]
    fn test_small_file_single_part() {
        let registry = PartRegistry::plan(100, 5 * MB);
        assert_eq!(registry.part_count(), 1);
        assert_eq!(registry.records().next().unwrap().length, 100);
    }

    #[test]
    fn test_next_pending_marks_in_flight() {
        let mut registry = PartRegistry::plan(16 * MB, 4 * MB);

        let first = registry.next_pending().unwrap();
        assert_eq!(first.part, 1);
        assert_eq!(registry.get(0).unwrap().status, PartStatus::InFlight);

        // next_pending 应该跳过正在上传的分片
        let second = registry.next_pending().unwrap();
        assert_eq!(second.part, 2);

        // 放回后应该可以再次选择
        registry.unmark_in_flight(first.offset);
        assert_eq!(registry.next_pending().unwrap().part, 1);
    }

    #[test]
    fn test_completion_and_progress() {
        let mut registry = PartRegistry::plan(16 * MB, 4 * MB);
        while let Some(part) = registry.next_pending() {
            assert!(!registry.is_completed());
            registry.mark_committed(part.offset, Some(format!("e{}", part.part)));
        }
        assert!(registry.is_completed());
        assert_eq!(registry.committed_bytes(), 16 * MB);
        assert_eq!(registry.committed_count(), 4);
        assert_eq!(
            registry.etag_list().as_deref(),
            Some("1:e1;2:e2;3:e3;4:e4")
        );
    }

    #[test]
    fn test_etag_list_rejects_missing_or_empty_tag() {
        let mut registry = PartRegistry::plan(8 * MB, 4 * MB);
        let first = registry.next_pending().unwrap();
        let second = registry.next_pending().unwrap();
        registry.mark_committed(first.offset, Some("e1".to_string()));
        registry.mark_committed(second.offset, None);
        assert_eq!(registry.etag_list(), None);

        let mut registry = PartRegistry::plan(8 * MB, 4 * MB);
        let first = registry.next_pending().unwrap();
        let second = registry.next_pending().unwrap();
        registry.mark_committed(first.offset, Some("e1".to_string()));
        registry.mark_committed(second.offset, Some(String::new()));
        assert_eq!(registry.etag_list(), None);
    }

    #[test]
    fn test_failed_part_blocks_completion() {
        let mut registry = PartRegistry::plan(8 * MB, 4 * MB);
        let first = registry.next_pending().unwrap();
        let second = registry.next_pending().unwrap();
        registry.mark_committed(first.offset, None);
        registry.mark_failed(second.offset);
        assert!(!registry.is_completed());
    }

    #[test]
    fn test_split_halves_cover_original() {
        let mut registry = PartRegistry::plan(8 * MB, 4 * MB);
        let first = registry.next_pending().unwrap();
        registry.increment_retry(first.offset);

        let (a, b) = registry.split(first.offset, limits()).unwrap();
        assert_eq!(a.part, 1);
        assert_eq!(b.part, 1);
        assert_eq!(a.offset, 0);
        assert_eq!(a.length + b.length, 4 * MB);
        assert_eq!(b.offset, a.end());
        assert_eq!(b.part_offset, 2 * MB);
        assert_eq!(a.generation, 1);
        assert_eq!(a.retries, 0);
        assert_eq!(b.retries, 0);
        assert!(registry.is_contiguous());

        // 两半优先于其余分片出队
        assert_eq!(registry.next_pending().unwrap().offset, a.offset);
        assert_eq!(registry.next_pending().unwrap().offset, b.offset);
        assert_eq!(registry.next_pending().unwrap().part, 2);
    }

    #[test]
    fn test_split_generation_limit() {
        let mut registry = PartRegistry::plan(4 * MB, 4 * MB);
        let part = registry.next_pending().unwrap();
        let (a, _) = registry.split(part.offset, limits()).unwrap();
        let (aa, _) = registry.split(a.offset, limits()).unwrap();
        assert_eq!(aa.generation, 2);
        assert!(registry.split(aa.offset, limits()).is_none());
        assert!(registry.is_contiguous());
    }

    #[test]
    fn test_split_min_size_limit() {
        let mut registry = PartRegistry::plan(40 * 1024, 40 * 1024);
        let part = registry.next_pending().unwrap();
        assert!(registry.split(part.offset, limits()).is_none());
        assert_eq!(registry.part_count(), 1);
    }

    proptest! {
        #[test]
        fn prop_plan_covers_exactly_once(size in 1u64..50_000_000, part_size in 64_000u64..8_000_000) {
            let registry = PartRegistry::plan(size, part_size);
            prop_assert!(registry.is_contiguous());
            prop_assert_eq!(registry.part_count() as u64, size.div_ceil(part_size));
            let total: u64 = registry.records().map(|r| r.length).sum();
            prop_assert_eq!(total, size);
            for (i, record) in registry.records().enumerate() {
                prop_assert_eq!(record.part as usize, i + 1);
            }
        }

        #[test]
        fn prop_splits_keep_coverage(size in 64_000u64..4_000_000, picks in proptest::collection::vec(0usize..16, 0..6)) {
            let mut registry = PartRegistry::plan(size, 1_000_000);
            let limits = SplitLimits { min_part_size: 1024, max_generations: 3 };
            for pick in picks {
                let offsets: Vec<u64> = registry.records().map(|r| r.offset).collect();
                let offset = offsets[pick % offsets.len()];
                registry.split(offset, limits);
                prop_assert!(registry.is_contiguous());
            }
        }
    }
}
