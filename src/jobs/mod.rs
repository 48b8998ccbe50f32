pub mod sync_scheduler_job;
