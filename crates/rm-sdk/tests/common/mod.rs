//! 集成测试公共工具：Mock 控制器与报文构造

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rm_sdk::driver::{PipelineConfig, Session, SessionConfig, ThreadMode};
use rm_sdk::protocol::{
    Command, CommandAck, Envelope, ForceFrame, ForceReading, ForceSample, Message,
    ProgramRunReport, RealtimeArmState, decode, encode,
};
use rm_transport::{MockController, mock_pair};

pub fn config() -> SessionConfig {
    SessionConfig {
        request_timeout: Duration::from_millis(300),
        join_timeout: Duration::from_secs(1),
        pipeline: PipelineConfig {
            link_timeout_ms: 100,
            ..Default::default()
        },
    }
}

pub fn session(mode: ThreadMode) -> (Session, MockController) {
    let (transport, controller) = mock_pair();
    let session = Session::new(transport, mode, config()).unwrap();
    (session, controller)
}

/// 构造一帧遥测，`marker` 写入第 1 关节角度便于识别
pub fn telemetry_frame(marker: f32) -> Vec<u8> {
    let mut state = RealtimeArmState {
        arm_ip: "192.168.1.18".into(),
        force: Some(ForceSample {
            frame: ForceFrame::Sensor,
            reading: ForceReading::SingleAxis {
                fz: 1.5,
                zero_fz: 0.0,
            },
        }),
        ..Default::default()
    };
    state.joints[0].position = marker;
    state.joints.iter_mut().for_each(|j| j.enabled = true);
    encode(&Envelope::unsolicited(Message::Telemetry(Box::new(state)))).to_vec()
}

/// 轮询直到条件成立或超时
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// 后台应答线程：接受所有指令，对状态查询回复 `report`
pub struct Responder {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Responder {
    pub fn spawn(controller: MockController, report: ProgramRunReport) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::spawn(move || {
            while flag.load(Ordering::Acquire) {
                let Some(frame) = controller.recv_sent(Duration::from_millis(10)) else {
                    continue;
                };
                let Ok(envelope) = decode(&frame) else {
                    continue;
                };
                let reply = match envelope.message {
                    Message::Command(Command::QueryProgramState) => {
                        Message::ProgramState(report.clone())
                    },
                    _ => Message::Ack(CommandAck::ACCEPTED),
                };
                controller.push(&Envelope::new(envelope.seq, reply));
            }
        });
        Self {
            running,
            handle: Some(handle),
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
