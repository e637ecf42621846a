//! 在线程序运行状态跟踪
//!
//! 状态机：`NotStarted → Running ⇄ Paused → ... → NotStarted`
//!
//! # 写者纪律
//!
//! - 显式 API（start/pause/resume/stop/step/speed）是指令派生字段的唯一写者
//! - 入站 `ProgramFinished` 事件是唯一不由本地调用驱动的状态切换，任意状态下都会
//!   把 `run_state` 置为 `NotStarted`，并递增 epoch
//!
//! # 票据协议
//!
//! 带指令的状态切换分三步：[`ProgramRunTracker::prepare`] 校验并记录 epoch →
//! 下发指令 → [`ProgramRunTracker::commit`]。若期间到达了 `ProgramFinished`，
//! epoch 已变化，改变运行状态的切换在 `commit` 时返回 `InvalidState`，
//! 事件写入的 `NotStarted` 保持不变。单步模式与速度只按当前状态重新校验，
//! 控制器已接受的属性照常写入。

use parking_lot::RwLock;
use rm_protocol::{EventPush, LoopCount, MAX_LOOP_PAIRS, PLAN_SPEED_MAX, ProgramRunReport, RunState};
use tracing::{debug, info, warn};

use crate::bounded::BoundedVec;
use crate::error::ClientError;

/// 循环指令计数表（最多 100 项）
pub type LoopCounters = BoundedVec<LoopCount, MAX_LOOP_PAIRS>;

/// 状态切换请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start { program_id: i32 },
    Pause,
    Resume,
    Stop,
    SetStepMode { enabled: bool },
    SetPlanSpeed { speed: u8 },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Start { .. } => "start",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Stop => "stop",
            Transition::SetStepMode { .. } => "set_step_mode",
            Transition::SetPlanSpeed { .. } => "set_plan_speed",
        }
    }

    /// 是否改变 `run_state`（单步模式与速度只改属性）
    pub fn changes_run_state(&self) -> bool {
        !matches!(
            self,
            Transition::SetStepMode { .. } | Transition::SetPlanSpeed { .. }
        )
    }

    /// 检查该切换在 `state` 下是否允许
    fn check(&self, state: RunState) -> Result<(), ClientError> {
        if let Transition::SetPlanSpeed { speed } = *self
            && !(1..=PLAN_SPEED_MAX).contains(&speed)
        {
            return Err(ClientError::InvalidInput(format!(
                "plan speed must be 1..={}, got {}",
                PLAN_SPEED_MAX, speed
            )));
        }

        let allowed = match self {
            Transition::Start { .. } => state == RunState::NotStarted,
            Transition::Pause => state == RunState::Running,
            Transition::Resume => state == RunState::Paused,
            Transition::Stop => state != RunState::NotStarted,
            // 运动中禁止修改单步模式与速度，需先暂停
            Transition::SetStepMode { .. } | Transition::SetPlanSpeed { .. } => {
                state != RunState::Running
            },
        };

        if allowed {
            Ok(())
        } else {
            Err(ClientError::InvalidState {
                operation: self.name(),
                state,
            })
        }
    }
}

/// 已校验、待提交的状态切换
#[derive(Debug)]
#[must_use = "a prepared transition has no effect until committed"]
pub struct TransitionTicket {
    transition: Transition,
    epoch: u64,
}

impl TransitionTicket {
    pub fn transition(&self) -> Transition {
        self.transition
    }
}

/// 运行状态快照（值拷贝）
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgramRunSnapshot {
    pub run_state: RunState,
    /// 运行中（或最近一次启动）的轨迹编号
    pub program_id: i32,
    /// 上次编辑的在线编程编号
    pub edit_id: i32,
    pub current_line: i32,
    pub step_mode: bool,
    /// 全局规划速度比例（0 表示未设置）
    pub plan_speed: u8,
    pub loops: Vec<LoopCount>,
    /// 最近一次 `ProgramFinished` 事件报告的编号
    pub last_finished: Option<i32>,
    /// `ProgramFinished` 事件计数
    pub epoch: u64,
}

impl ProgramRunSnapshot {
    /// 循环指令数量
    pub fn total_loop(&self) -> usize {
        self.loops.len()
    }

    /// 指定行的已执行次数
    pub fn loop_count(&self, line: i32) -> Option<u32> {
        self.loops.iter().find(|l| l.line == line).map(|l| l.count)
    }
}

#[derive(Debug)]
struct TrackerState {
    run_state: RunState,
    program_id: i32,
    edit_id: i32,
    current_line: i32,
    step_mode: bool,
    plan_speed: u8,
    loops: LoopCounters,
    last_finished: Option<i32>,
    epoch: u64,
}

impl TrackerState {
    fn new() -> Self {
        Self {
            run_state: RunState::NotStarted,
            program_id: 0,
            edit_id: 0,
            current_line: 0,
            step_mode: false,
            plan_speed: 0,
            loops: LoopCounters::new("loop counters"),
            last_finished: None,
            epoch: 0,
        }
    }

    fn apply(&mut self, transition: Transition) {
        match transition {
            Transition::Start { program_id } => {
                self.run_state = RunState::Running;
                self.program_id = program_id;
                self.current_line = 0;
                self.loops.clear();
            },
            Transition::Pause => self.run_state = RunState::Paused,
            Transition::Resume => self.run_state = RunState::Running,
            Transition::Stop => self.run_state = RunState::NotStarted,
            Transition::SetStepMode { enabled } => self.step_mode = enabled,
            Transition::SetPlanSpeed { speed } => self.plan_speed = speed,
        }
    }

    fn snapshot(&self) -> ProgramRunSnapshot {
        ProgramRunSnapshot {
            run_state: self.run_state,
            program_id: self.program_id,
            edit_id: self.edit_id,
            current_line: self.current_line,
            step_mode: self.step_mode,
            plan_speed: self.plan_speed,
            loops: self.loops.as_slice().to_vec(),
            last_finished: self.last_finished,
            epoch: self.epoch,
        }
    }
}

/// 在线程序运行状态跟踪器
///
/// 读路径返回值拷贝；所有写入在同一把写锁内完成，不存在撕裂读。
#[derive(Debug)]
pub struct ProgramRunTracker {
    state: RwLock<TrackerState>,
}

impl ProgramRunTracker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TrackerState::new()),
        }
    }

    pub fn snapshot(&self) -> ProgramRunSnapshot {
        self.state.read().snapshot()
    }

    pub fn run_state(&self) -> RunState {
        self.state.read().run_state
    }

    // ========================================================================
    // 票据协议
    // ========================================================================

    /// 校验切换并记录当前 epoch
    ///
    /// # 错误
    /// - `ClientError::InvalidState`: 当前状态不允许该切换
    /// - `ClientError::InvalidInput`: 速度越界
    pub fn prepare(&self, transition: Transition) -> Result<TransitionTicket, ClientError> {
        let state = self.state.read();
        transition.check(state.run_state)?;
        Ok(TransitionTicket {
            transition,
            epoch: state.epoch,
        })
    }

    /// 提交切换
    ///
    /// 运行状态切换期间若到达 `ProgramFinished`（epoch 变化），或其他本地调用
    /// 使状态不再允许该切换，返回 `InvalidState` 且不做任何修改。
    pub fn commit(&self, ticket: TransitionTicket) -> Result<ProgramRunSnapshot, ClientError> {
        let mut state = self.state.write();
        if ticket.transition.changes_run_state() && state.epoch != ticket.epoch {
            debug!(
                "Transition '{}' superseded by ProgramFinished (epoch {} -> {})",
                ticket.transition.name(),
                ticket.epoch,
                state.epoch
            );
            return Err(ClientError::InvalidState {
                operation: ticket.transition.name(),
                state: state.run_state,
            });
        }
        ticket.transition.check(state.run_state)?;
        state.apply(ticket.transition);
        debug!(
            "Program tracker: '{}' -> {}",
            ticket.transition.name(),
            state.run_state
        );
        Ok(state.snapshot())
    }

    /// 不经控制器直接切换（prepare + commit）
    pub fn apply(&self, transition: Transition) -> Result<ProgramRunSnapshot, ClientError> {
        let ticket = self.prepare(transition)?;
        self.commit(ticket)
    }

    pub fn start(&self, program_id: i32) -> Result<(), ClientError> {
        self.apply(Transition::Start { program_id }).map(|_| ())
    }

    pub fn pause(&self) -> Result<(), ClientError> {
        self.apply(Transition::Pause).map(|_| ())
    }

    pub fn resume(&self) -> Result<(), ClientError> {
        self.apply(Transition::Resume).map(|_| ())
    }

    pub fn stop(&self) -> Result<(), ClientError> {
        self.apply(Transition::Stop).map(|_| ())
    }

    pub fn set_step_mode(&self, enabled: bool) -> Result<(), ClientError> {
        self.apply(Transition::SetStepMode { enabled }).map(|_| ())
    }

    pub fn set_plan_speed(&self, speed: u8) -> Result<(), ClientError> {
        self.apply(Transition::SetPlanSpeed { speed }).map(|_| ())
    }

    // ========================================================================
    // 事件驱动写入
    // ========================================================================

    /// 在线程序运行结束：任意状态 → NotStarted
    pub fn on_program_finished(&self, program_id: i32) {
        let mut state = self.state.write();
        let previous = state.run_state;
        state.run_state = RunState::NotStarted;
        state.last_finished = Some(program_id);
        state.epoch += 1;
        info!("Program {} finished (was {})", program_id, previous);
    }

    /// 处理入站事件，只有 `ProgramFinished` 影响运行状态
    pub fn on_event(&self, event: &EventPush) {
        match *event {
            EventPush::ProgramFinished { program_id } => self.on_program_finished(program_id),
            EventPush::TrajectoryReached {
                arrived,
                device,
                chain_next,
            } => {
                debug!(
                    "Trajectory reached: arrived={}, device={:?}, chain_next={}",
                    arrived, device, chain_next
                );
            },
            EventPush::None => {},
        }
    }

    // ========================================================================
    // 循环计数
    // ========================================================================

    /// 循环指令执行一次，返回该行累计次数
    ///
    /// # 错误
    /// - `ClientError::CapacityExceeded`: 新行号且表已满（100 项），已有计数不受影响
    pub fn record_loop_iteration(&self, line: i32) -> Result<u32, ClientError> {
        let mut state = self.state.write();
        if let Some(pair) = state.loops.iter_mut().find(|p| p.line == line) {
            pair.count = pair.count.saturating_add(1);
            return Ok(pair.count);
        }
        state.loops.push(LoopCount { line, count: 1 })?;
        Ok(1)
    }

    /// 用控制器报告同步计数类字段（行号、循环计数、编号、单步、速度）
    ///
    /// 不修改 `run_state`：运行状态只由显式指令与 `ProgramFinished` 事件驱动。
    /// 两边不一致时记录 warn。
    pub fn sync_from_report(&self, report: &ProgramRunReport) -> Result<(), ClientError> {
        let mut state = self.state.write();
        state.loops.replace_all(report.loops.clone())?;
        state.program_id = report.program_id;
        state.edit_id = report.edit_id;
        state.current_line = report.current_line;
        state.step_mode = report.step_mode;
        state.plan_speed = report.plan_speed;

        if report.run_state != state.run_state {
            warn!(
                "Controller reports program {} but local tracker is {}",
                report.run_state, state.run_state
            );
        }
        Ok(())
    }
}

impl Default for ProgramRunTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn running(program_id: i32) -> ProgramRunTracker {
        let tracker = ProgramRunTracker::new();
        tracker.start(program_id).unwrap();
        tracker
    }

    #[test]
    fn test_pause_resume_from_not_started_fail() {
        let tracker = ProgramRunTracker::new();
        for result in [tracker.pause(), tracker.resume(), tracker.stop()] {
            assert!(matches!(
                result,
                Err(ClientError::InvalidState {
                    state: RunState::NotStarted,
                    ..
                })
            ));
        }
        assert_eq!(tracker.run_state(), RunState::NotStarted);
    }

    #[test]
    fn test_start_while_running_or_paused_fails() {
        let tracker = running(1);
        assert!(matches!(
            tracker.start(2),
            Err(ClientError::InvalidState {
                operation: "start",
                state: RunState::Running
            })
        ));

        tracker.pause().unwrap();
        assert!(matches!(
            tracker.start(2),
            Err(ClientError::InvalidState {
                state: RunState::Paused,
                ..
            })
        ));
        assert_eq!(tracker.snapshot().program_id, 1);
    }

    #[test]
    fn test_full_cycle() {
        let tracker = running(5);
        tracker.pause().unwrap();
        assert_eq!(tracker.run_state(), RunState::Paused);
        tracker.resume().unwrap();
        assert_eq!(tracker.run_state(), RunState::Running);
        tracker.stop().unwrap();
        assert_eq!(tracker.run_state(), RunState::NotStarted);
    }

    #[test]
    fn test_start_resets_loop_counters() {
        let tracker = running(1);
        tracker.record_loop_iteration(10).unwrap();
        tracker.record_loop_iteration(10).unwrap();
        assert_eq!(tracker.snapshot().loop_count(10), Some(2));

        tracker.stop().unwrap();
        tracker.start(2).unwrap();
        let snap = tracker.snapshot();
        assert_eq!(snap.total_loop(), 0);
        assert_eq!(snap.current_line, 0);
    }

    #[test]
    fn test_step_mode_and_speed_blocked_while_running() {
        let tracker = running(1);
        assert!(matches!(
            tracker.set_step_mode(true),
            Err(ClientError::InvalidState { .. })
        ));
        assert!(matches!(
            tracker.set_plan_speed(50),
            Err(ClientError::InvalidState { .. })
        ));

        tracker.pause().unwrap();
        tracker.set_step_mode(true).unwrap();
        tracker.set_plan_speed(50).unwrap();
        let snap = tracker.snapshot();
        assert!(snap.step_mode);
        assert_eq!(snap.plan_speed, 50);
    }

    #[test]
    fn test_plan_speed_range() {
        let tracker = ProgramRunTracker::new();
        assert!(matches!(
            tracker.set_plan_speed(0),
            Err(ClientError::InvalidInput(_))
        ));
        assert!(matches!(
            tracker.set_plan_speed(101),
            Err(ClientError::InvalidInput(_))
        ));
        tracker.set_plan_speed(100).unwrap();
        tracker.set_plan_speed(1).unwrap();
    }

    #[test]
    fn test_program_finished_from_any_state() {
        for pause_first in [false, true] {
            let tracker = running(3);
            if pause_first {
                tracker.pause().unwrap();
            }
            tracker.on_program_finished(3);
            let snap = tracker.snapshot();
            assert_eq!(snap.run_state, RunState::NotStarted);
            assert_eq!(snap.last_finished, Some(3));
            assert_eq!(snap.epoch, 1);
        }

        let idle = ProgramRunTracker::new();
        idle.on_event(&EventPush::ProgramFinished { program_id: 9 });
        assert_eq!(idle.snapshot().last_finished, Some(9));
    }

    #[test]
    fn test_event_supersedes_prepared_pause() {
        let tracker = running(4);
        let ticket = tracker.prepare(Transition::Pause).unwrap();

        // 指令在途时事件到达
        tracker.on_program_finished(4);

        assert!(matches!(
            tracker.commit(ticket),
            Err(ClientError::InvalidState {
                operation: "pause",
                state: RunState::NotStarted
            })
        ));
        assert_eq!(tracker.run_state(), RunState::NotStarted);
    }

    #[test]
    fn test_attribute_change_survives_finish_event() {
        let tracker = running(4);
        tracker.pause().unwrap();
        let speed = tracker.prepare(Transition::SetPlanSpeed { speed: 30 }).unwrap();
        let step = tracker
            .prepare(Transition::SetStepMode { enabled: true })
            .unwrap();

        tracker.on_program_finished(4);

        let snap = tracker.commit(speed).unwrap();
        assert_eq!(snap.plan_speed, 30);
        assert_eq!(snap.run_state, RunState::NotStarted);
        assert!(tracker.commit(step).unwrap().step_mode);
        assert_eq!(tracker.snapshot().last_finished, Some(4));
    }

    #[test]
    fn test_attribute_commit_rechecks_current_state() {
        let tracker = running(4);
        tracker.pause().unwrap();
        let ticket = tracker.prepare(Transition::SetPlanSpeed { speed: 30 }).unwrap();
        tracker.resume().unwrap();

        assert!(matches!(
            tracker.commit(ticket),
            Err(ClientError::InvalidState {
                operation: "set_plan_speed",
                state: RunState::Running
            })
        ));
        assert_eq!(tracker.snapshot().plan_speed, 0);
    }

    #[test]
    fn test_concurrent_pause_and_finish_always_not_started() {
        for _ in 0..200 {
            let tracker = Arc::new(running(8));
            let t = tracker.clone();
            let pauser = thread::spawn(move || {
                if let Ok(ticket) = t.prepare(Transition::Pause) {
                    let _ = t.commit(ticket);
                }
            });
            let f = tracker.clone();
            let finisher = thread::spawn(move || f.on_program_finished(8));
            pauser.join().unwrap();
            finisher.join().unwrap();

            let snap = tracker.snapshot();
            assert_eq!(snap.run_state, RunState::NotStarted);
            assert_eq!(snap.last_finished, Some(8));
        }
    }

    #[test]
    fn test_loop_counter_cap() {
        let tracker = running(1);
        for line in 0..MAX_LOOP_PAIRS as i32 {
            tracker.record_loop_iteration(line).unwrap();
        }
        let err = tracker.record_loop_iteration(1000).unwrap_err();
        assert!(matches!(
            err,
            ClientError::CapacityExceeded {
                current: 100,
                limit: 100,
                ..
            }
        ));

        // 已有行仍可累加，前 100 项完好
        assert_eq!(tracker.record_loop_iteration(0).unwrap(), 2);
        let snap = tracker.snapshot();
        assert_eq!(snap.total_loop(), MAX_LOOP_PAIRS);
        assert_eq!(snap.loop_count(99), Some(1));
        assert_eq!(snap.loop_count(1000), None);
    }

    #[test]
    fn test_sync_from_report_keeps_run_state() {
        let tracker = running(2);
        let report = ProgramRunReport {
            run_state: RunState::Paused,
            step_mode: true,
            plan_speed: 40,
            program_id: 2,
            edit_id: 11,
            current_line: 17,
            loops: vec![LoopCount { line: 5, count: 3 }],
        };
        tracker.sync_from_report(&report).unwrap();

        let snap = tracker.snapshot();
        assert_eq!(snap.run_state, RunState::Running);
        assert_eq!(snap.current_line, 17);
        assert_eq!(snap.edit_id, 11);
        assert_eq!(snap.loop_count(5), Some(3));
        assert!(snap.step_mode);
        assert_eq!(snap.plan_speed, 40);
    }
}
