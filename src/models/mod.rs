pub mod partner;
pub mod reconciliation;
pub mod shipment;
pub mod upload;

pub use partner::{Partner, PartnerType};
pub use reconciliation::{
    NewReconciliation, NewReconciliationItem, Reconciliation, ReconciliationDetail,
    ReconciliationItem, ReconciliationStatus, ReconciliationTotals,
};
pub use shipment::{NewShipment, Shipment};
pub use upload::{
    NewUpload, NewUploadItem, ReconciliationUpload, RowStatus, SettlementRow, UploadDetail,
    UploadItem, UploadStatus, UploadSummary,
};
