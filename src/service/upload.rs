use super::aggregator::{self, Aggregator, ReconLocks};
use super::matcher::Matcher;
use super::normalizer;
use crate::error::{ReconError, Result};
use crate::models::{
    NewUpload, PartnerType, ReconciliationUpload, UploadDetail, UploadStatus,
};
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;

/// 上传提交请求 (文件字节 + 声明的归属)
#[derive(Debug, Clone)]
pub struct SubmitUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub upload_type: PartnerType,
    pub partner_id: Option<i64>,
    pub reconciliation_id: Option<i64>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
}

/// 上传生命周期控制器
///
/// 受理时同步校验并立即转 processing, 行级处理全部在后台完成;
/// 全量聚合在内存中算好后一次性落终态, 读者看不到部分和。
/// completed / failed 均为终态, 重试即重新提交。
pub struct UploadService {
    store: Arc<dyn crate::store::ReconStore>,
    matcher: Matcher,
    aggregator: Aggregator,
    max_file_size: usize,
    processing_timeout: Duration,
}

impl UploadService {
    pub fn new(
        store: Arc<dyn crate::store::ReconStore>,
        locks: ReconLocks,
        max_file_size: usize,
        processing_timeout: Duration,
    ) -> Self {
        Self {
            matcher: Matcher::new(store.clone()),
            aggregator: Aggregator::new(store.clone(), locks),
            store,
            max_file_size,
            processing_timeout,
        }
    }

    /// 受理上传: 同步拒绝不合格文件, 其余交给后台流水线
    pub async fn submit(self: &Arc<Self>, req: SubmitUpload) -> Result<ReconciliationUpload> {
        // 格式与大小在受理时拒绝, 不产生任何持久化状态
        normalizer::validate(&req.file_name, req.bytes.len(), self.max_file_size)?;

        if let Some(partner_id) = req.partner_id {
            let partner = self
                .store
                .get_partner(partner_id)
                .await?
                .ok_or_else(|| {
                    ReconError::Validation(format!("partner {partner_id} does not exist"))
                })?;
            if partner.partner_type != req.upload_type {
                return Err(ReconError::Validation(format!(
                    "partner {} is a {} partner, upload_type is {}",
                    partner_id, partner.partner_type, req.upload_type
                )));
            }
        }
        if let Some(reconciliation_id) = req.reconciliation_id {
            if self
                .store
                .get_reconciliation(reconciliation_id)
                .await?
                .is_none()
            {
                return Err(ReconError::Validation(format!(
                    "reconciliation {reconciliation_id} does not exist"
                )));
            }
        }

        let upload = self
            .store
            .insert_upload(NewUpload {
                file_name: req.file_name.clone(),
                upload_type: req.upload_type,
                partner_id: req.partner_id,
                reconciliation_id: req.reconciliation_id,
                period_start: req.period_start,
                period_end: req.period_end,
            })
            .await?;

        // 受理即开始处理, 调用方最多短暂看到 pending
        self.store.mark_upload_processing(upload.id).await?;
        tracing::info!(
            "Upload {} ({}) accepted, 进入后台处理",
            upload.id,
            upload.file_name
        );

        let service = Arc::clone(self);
        let upload_id = upload.id;
        tokio::spawn(async move {
            service.run_pipeline(upload_id, req).await;
        });

        Ok(self.store.get_upload(upload_id).await?.unwrap_or(upload))
    }

    /// 后台流水线: 错误不向提交方抛出, failed 状态即错误通道
    async fn run_pipeline(&self, upload_id: i64, req: SubmitUpload) {
        let outcome =
            tokio::time::timeout(self.processing_timeout, self.process(upload_id, &req)).await;
        match outcome {
            Ok(Ok(())) => {
                tracing::info!("Upload {} completed", upload_id);
            }
            Ok(Err(e)) => {
                tracing::error!("Upload {} failed: {}", upload_id, e);
                if let Err(write_err) = self.store.fail_upload(upload_id, &e.to_string()).await {
                    tracing::error!("Upload {} 终态写入失败: {}", upload_id, write_err);
                }
            }
            Err(_) => {
                tracing::error!("Upload {} 处理超时 (>{:?})", upload_id, self.processing_timeout);
                if let Err(write_err) = self
                    .store
                    .fail_upload(upload_id, "processing timeout")
                    .await
                {
                    tracing::error!("Upload {} 终态写入失败: {}", upload_id, write_err);
                }
            }
        }
    }

    /// 规范化 -> 匹配 -> 内存汇总 -> (挂靠对账单回写) -> 单次终态落库
    async fn process(&self, upload_id: i64, req: &SubmitUpload) -> Result<()> {
        let rows = normalizer::normalize(&req.file_name, &req.bytes, self.max_file_size)?;
        tracing::info!("Upload {}: 解析出 {} 行", upload_id, rows.len());

        let matched = self
            .matcher
            .match_rows(req.partner_id, req.upload_type, &rows)
            .await?;
        let summary = aggregator::summarize(&matched);

        // 对账单回写先于上传终态: 冻结拒绝时上传整体判失败, 不留半套结果
        if let Some(reconciliation_id) = req.reconciliation_id {
            self.aggregator
                .apply_to_reconciliation(reconciliation_id, req.upload_type, &matched)
                .await?;
        }

        let items = matched.into_iter().map(|m| m.item).collect();
        self.store.complete_upload(upload_id, summary, items).await?;
        Ok(())
    }

    /// 查询上传; 明细仅在 completed 后随详情返回
    pub async fn get(&self, id: i64) -> Result<UploadDetail> {
        let upload = self
            .store
            .get_upload(id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("upload {id}")))?;
        let items = if upload.status == UploadStatus::Completed {
            self.store.list_upload_items(id).await?
        } else {
            Vec::new()
        };
        Ok(UploadDetail { upload, items })
    }

    /// 看门狗: 卡在 processing 超过时限的上传判失败 (活性保障)
    pub async fn expire_stale(&self, older_than: Duration) -> Result<usize> {
        let window = chrono::Duration::from_std(older_than)
            .map_err(|e| ReconError::Processing(format!("invalid timeout window: {e}")))?;
        let cutoff = Utc::now() - window;

        let stale = self.store.list_stale_processing_uploads(cutoff).await?;
        let count = stale.len();
        futures::future::try_join_all(
            stale
                .iter()
                .map(|id| self.store.fail_upload(*id, "processing timeout")),
        )
        .await?;
        Ok(count)
    }
}
