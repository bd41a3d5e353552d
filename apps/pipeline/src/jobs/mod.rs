//! Background execution: Redis-backed priority queues, worker pools, task
//! handlers and the periodic scheduler.

pub mod queue;
pub mod scheduler;
pub mod tasks;
pub mod worker;

pub use queue::{JobQueue, QueueName, RedisJobQueue, TaskEnvelope, TaskKind};
pub use scheduler::{ScheduleConfig, Scheduler, SchedulerHandle};
pub use tasks::TaskRunner;
pub use worker::{WorkerConfig, WorkerHandle, WorkerPool};
