pub use super::file_records::Entity as FileRecords;
pub use super::transfer_jobs::Entity as TransferJobs;
pub use super::user_quotas::Entity as UserQuotas;
