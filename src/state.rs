use std::sync::Arc;

use crate::config::Config;
use crate::scheduler::Scheduler;
use crate::worker::SchedulerHandle;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub scheduler: Arc<Scheduler>,
    pub handle: SchedulerHandle,
}
