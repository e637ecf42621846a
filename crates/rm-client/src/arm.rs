//! 高层机械臂接口
//!
//! [`RobotArm`] 把会话、在线程序跟踪器、轨迹/路点目录与用户事件回调组装在一起。
//! 每个入站事件先交给跟踪器，再交给用户回调，因此用户回调里读到的
//! 运行状态已经反映了该事件。

use std::sync::Arc;

use parking_lot::RwLock;
use rm_driver::{ArmHandle, ArmState, EventHandler, Session, SessionBuilder};
use rm_protocol::{Command, EventPush, PLAN_SPEED_MAX, ProgramRunReport, RealtimePushConfig};
use tracing::{debug, info};

use crate::catalog::{Catalog, TrajectoryRecord, Waypoint};
use crate::error::ClientError;
use crate::tracker::{ProgramRunSnapshot, ProgramRunTracker, Transition};

type UserHandlerSlot = Arc<RwLock<Option<Arc<dyn EventHandler>>>>;

/// 注册到会话上的组合回调：跟踪器优先，然后是用户回调
struct TrackingEventHandler {
    tracker: Arc<ProgramRunTracker>,
    user: UserHandlerSlot,
}

impl EventHandler for TrackingEventHandler {
    fn on_event(&self, handle: ArmHandle, event: &EventPush) {
        self.tracker.on_event(event);
        let user = self.user.read().clone();
        if let Some(handler) = user {
            handler.on_event(handle, event);
        }
    }
}

/// 机械臂（高层接口）
pub struct RobotArm {
    session: Session,
    tracker: Arc<ProgramRunTracker>,
    user_handler: UserHandlerSlot,
    trajectories: Catalog<TrajectoryRecord>,
    waypoints: Catalog<Waypoint>,
}

impl RobotArm {
    /// 在已有会话上构建
    pub fn new(session: Session) -> Self {
        let tracker = Arc::new(ProgramRunTracker::new());
        let user_handler: UserHandlerSlot = Arc::new(RwLock::new(None));
        session.set_event_handler(Arc::new(TrackingEventHandler {
            tracker: tracker.clone(),
            user: user_handler.clone(),
        }));

        Self {
            session,
            tracker,
            user_handler,
            trajectories: Catalog::new(),
            waypoints: Catalog::new(),
        }
    }

    /// 连接控制器
    ///
    /// # 错误
    /// 连接失败时返回 `ClientError::Driver(DriverError::Connect { .. })`
    pub fn connect(builder: SessionBuilder) -> Result<Self, ClientError> {
        Ok(Self::new(builder.connect()?))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn handle(&self) -> ArmHandle {
        self.session.handle()
    }

    pub fn arm_state(&self) -> ArmState {
        self.session.arm_state()
    }

    pub fn tracker(&self) -> &Arc<ProgramRunTracker> {
        &self.tracker
    }

    pub fn program_state(&self) -> ProgramRunSnapshot {
        self.tracker.snapshot()
    }

    pub fn trajectories(&self) -> &Catalog<TrajectoryRecord> {
        &self.trajectories
    }

    pub fn waypoints(&self) -> &Catalog<Waypoint> {
        &self.waypoints
    }

    /// 注册用户事件回调（后注册者覆盖）
    ///
    /// 回调在接收线程上执行，不得阻塞。
    pub fn set_event_handler(&self, handler: Arc<dyn EventHandler>) {
        *self.user_handler.write() = Some(handler);
    }

    pub fn clear_event_handler(&self) {
        *self.user_handler.write() = None;
    }

    // ========================================================================
    // 在线程序控制
    // ========================================================================

    /// 运行指定轨迹
    ///
    /// # 参数
    /// - `program_id`: 在线编程编号
    /// - `speed`: 运行速度比例（0-100，0 表示使用文件内速度）
    pub fn start_program(&self, program_id: i32, speed: u8) -> Result<(), ClientError> {
        if speed > PLAN_SPEED_MAX {
            return Err(ClientError::InvalidInput(format!(
                "program speed must be 0..={}, got {}",
                PLAN_SPEED_MAX, speed
            )));
        }
        self.transition(
            Transition::Start { program_id },
            Command::StartProgram { program_id, speed },
        )
    }

    pub fn pause_program(&self) -> Result<(), ClientError> {
        self.transition(Transition::Pause, Command::PauseProgram)
    }

    pub fn resume_program(&self) -> Result<(), ClientError> {
        self.transition(Transition::Resume, Command::ResumeProgram)
    }

    pub fn stop_program(&self) -> Result<(), ClientError> {
        self.transition(Transition::Stop, Command::StopProgram)
    }

    /// 设置单步模式（运行中需先暂停）
    pub fn set_step_mode(&self, enabled: bool) -> Result<(), ClientError> {
        self.transition(
            Transition::SetStepMode { enabled },
            Command::SetStepMode { enabled },
        )
    }

    /// 设置全局规划速度比例（1-100，运行中需先暂停）
    pub fn set_plan_speed(&self, speed: u8) -> Result<(), ClientError> {
        self.transition(
            Transition::SetPlanSpeed { speed },
            Command::SetPlanSpeed { speed },
        )
    }

    /// 查询控制器上的运行状态，并同步跟踪器的计数类字段
    pub fn query_program_state(&self) -> Result<ProgramRunReport, ClientError> {
        let report = self
            .session
            .query_program_state(self.session.config().request_timeout)?;
        self.tracker.sync_from_report(&report)?;
        Ok(report)
    }

    pub fn set_realtime_push(&self, config: RealtimePushConfig) -> Result<(), ClientError> {
        self.session
            .set_realtime_push(config, self.session.config().request_timeout)?;
        Ok(())
    }

    /// 关闭会话；返回后不会再调用任何回调
    pub fn disconnect(self) -> Result<(), ClientError> {
        info!("Disconnecting arm {}", self.session.handle());
        self.session.disconnect()?;
        Ok(())
    }

    /// prepare → 下发指令 → commit
    ///
    /// 运行状态切换被控制器接受、但期间到达了 `ProgramFinished` 时，返回
    /// `InvalidState`，事件写入的 `NotStarted` 保持不变。
    fn transition(&self, transition: Transition, command: Command) -> Result<(), ClientError> {
        let ticket = self.tracker.prepare(transition)?;
        self.session
            .execute(&command, self.session.config().request_timeout)?;
        let snapshot = self.tracker.commit(ticket)?;
        debug!(
            "Arm {} program state: {} (program {})",
            self.session.handle(),
            snapshot.run_state,
            snapshot.program_id
        );
        Ok(())
    }
}
