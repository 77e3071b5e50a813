// 批量处理：逐项独立校验与持久化，单项失败只进入失败集合，不中断整批，也不回滚已完成的项。
use super::error::{BehaviorError, BehaviorErrorKind};
use super::validation::{validate_batch_size, BATCH_DELETE_TAGS, BATCH_RECORD_TAGS};
use super::BehaviorService;
use crate::schemas::{
    BatchDeleteBehaviorRequest, BatchDeleteBehaviorResponse, BatchRecordBehaviorRequest,
    BatchRecordBehaviorResponse, RecordBehaviorRequest, RecordBehaviorResponse,
};
use futures::stream::{self, StreamExt};
use std::future::Future;
use tracing::info;

pub(crate) enum ItemOutcome<S, F> {
    Succeeded(S),
    Failed(F),
}

/// 以有界并发处理各项并按输入顺序折叠结果；累加只发生在调用方任务上，无需加锁。
/// 调用方 future 被丢弃时，尚未调度的项不会再执行。
pub(crate) async fn fold_batch<I, S, F, Fut, Op>(
    items: Vec<I>,
    concurrency: usize,
    op: Op,
) -> (Vec<S>, Vec<F>)
where
    Op: FnMut(I) -> Fut,
    Fut: Future<Output = ItemOutcome<S, F>>,
{
    let width = concurrency.clamp(1, items.len().max(1));
    stream::iter(items)
        .map(op)
        .buffered(width)
        .fold(
            (Vec::new(), Vec::new()),
            |(mut succeeded, mut failed), outcome| async move {
                match outcome {
                    ItemOutcome::Succeeded(value) => succeeded.push(value),
                    ItemOutcome::Failed(value) => failed.push(value),
                }
                (succeeded, failed)
            },
        )
        .await
}

fn log_item_failure(operation: &str, item: &str, err: &BehaviorError) {
    // 内部错误已在单项路径记录完整细节，这里只补充批量上下文。
    if err.kind() != BehaviorErrorKind::Internal {
        info!("{operation} skipped {item}: {err}");
    }
}

impl BehaviorService {
    pub async fn batch_record(
        &self,
        request: BatchRecordBehaviorRequest,
    ) -> Result<BatchRecordBehaviorResponse, BehaviorError> {
        validate_batch_size(
            request.behaviors.len(),
            self.limits().max_batch_size,
            &BATCH_RECORD_TAGS,
        )?;
        let (success_list, fail_list) = fold_batch(
            request.behaviors,
            self.limits().batch_concurrency,
            |item: RecordBehaviorRequest| async move {
                match self.record(&item).await {
                    Ok(response) => ItemOutcome::Succeeded(response),
                    Err(err) => {
                        let label = format!("key={}, user_id={}", item.key, item.user_id);
                        log_item_failure("batch record", &label, &err);
                        ItemOutcome::Failed(item)
                    }
                }
            },
        )
        .await;
        Ok(BatchRecordBehaviorResponse {
            success_count: success_list.len() as i64,
            fail_count: fail_list.len() as i64,
            success_list,
            fail_list,
        })
    }

    pub async fn batch_delete(
        &self,
        request: BatchDeleteBehaviorRequest,
    ) -> Result<BatchDeleteBehaviorResponse, BehaviorError> {
        validate_batch_size(
            request.ids.len(),
            self.limits().max_batch_size,
            &BATCH_DELETE_TAGS,
        )?;
        let (deleted, failed_ids) = fold_batch(
            request.ids,
            self.limits().batch_concurrency,
            |id: i64| async move {
                match self.delete(id).await {
                    Ok(_) => ItemOutcome::Succeeded(id),
                    Err(err) => {
                        log_item_failure("batch delete", &format!("id={id}"), &err);
                        ItemOutcome::Failed(id)
                    }
                }
            },
        )
        .await;
        Ok(BatchDeleteBehaviorResponse {
            deleted_count: deleted.len() as i64,
            failed_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn fold_keeps_input_order_under_concurrency() {
        let items: Vec<u64> = (0..20).collect();
        let (even, odd) = fold_batch(items, 8, |value| async move {
            // 越靠前的项完成得越晚，检验输出仍按输入顺序。
            tokio::time::sleep(Duration::from_millis(20 - value)).await;
            if value % 2 == 0 {
                ItemOutcome::Succeeded(value)
            } else {
                ItemOutcome::Failed(value)
            }
        })
        .await;
        assert_eq!(even, (0..20).step_by(2).collect::<Vec<_>>());
        assert_eq!(odd, (1..20).step_by(2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn fold_respects_concurrency_bound() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..12).collect();
        let (done, failed) = fold_batch::<_, usize, usize, _, _>(items, 3, |value| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                ItemOutcome::Succeeded(value)
            }
        })
        .await;
        assert_eq!(done.len(), 12);
        assert!(failed.is_empty());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn zero_concurrency_still_processes_sequentially() {
        let (done, failed) = fold_batch::<_, i32, i32, _, _>(vec![1, 2, 3], 0, |value| async move {
            ItemOutcome::Succeeded(value)
        })
        .await;
        assert_eq!(done, vec![1, 2, 3]);
        assert!(failed.is_empty());
    }
}
