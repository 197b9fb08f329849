// 测试用中继
//
// `MockRelay` 记录 start/stop 调用次数，并允许测试代码主动注入中继事件。

use super::{RelayEvent, RelayEventSender, RelayFactory, UpstreamRelay};
use async_trait::async_trait;
use bytes::Bytes;
use common::{ChannelSource, RelayError, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::Notify;

pub struct MockRelay {
    pub number: u32,
    events: RelayEventSender,
    starts: AtomicUsize,
    stops: AtomicUsize,
    hold_start: bool,
    fail_start: bool,
    slow_stop: Option<Duration>,
    release: Notify,
    codec: OnceLock<String>,
    header: OnceLock<Bytes>,
}

impl MockRelay {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// 放行被挂起的 start
    pub fn release_start(&self) {
        self.release.notify_one();
    }

    pub async fn emit_codec(&self, codec: &str, header: &'static [u8]) {
        let _ = self.codec.set(codec.to_string());
        let _ = self.header.set(Bytes::from_static(header));
        let _ = self
            .events
            .send(RelayEvent::CodecReady {
                codec: codec.to_string(),
                header: Bytes::from_static(header),
            })
            .await;
    }

    pub async fn emit_frame(&self, data: &'static [u8]) {
        let _ = self.events.send(RelayEvent::Frame(Bytes::from_static(data))).await;
    }

    pub async fn emit_closed(&self) {
        let _ = self.events.send(RelayEvent::Closed).await;
    }
}

#[async_trait]
impl UpstreamRelay for MockRelay {
    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.hold_start {
            self.release.notified().await;
        }
        if self.fail_start {
            return Err(RelayError::RelayStart("mock start failure".to_string()));
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.slow_stop {
            std::thread::sleep(delay);
        }
    }

    fn codec(&self) -> Option<String> {
        self.codec.get().cloned()
    }

    fn header(&self) -> Option<Bytes> {
        self.header.get().cloned()
    }
}

#[derive(Default)]
pub struct MockRelayFactory {
    relays: Mutex<Vec<Arc<MockRelay>>>,
    failing: Mutex<HashSet<u32>>,
    hold_start: AtomicBool,
    fail_start: AtomicBool,
    slow_stop: Mutex<Option<Duration>>,
}

impl MockRelayFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 让指定通道的构造失败
    pub fn fail_construction(&self, number: u32) {
        self.failing.lock().unwrap().insert(number);
    }

    /// 之后创建的中继在 start 中挂起，直到 `release_start`
    pub fn hold_start(&self) {
        self.hold_start.store(true, Ordering::SeqCst);
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    /// 之后创建的中继在 stop 中阻塞指定时长，`None` 取消
    pub fn slow_stop(&self, delay: Option<Duration>) {
        *self.slow_stop.lock().unwrap() = delay;
    }

    pub fn created(&self) -> Vec<Arc<MockRelay>> {
        self.relays.lock().unwrap().clone()
    }

    /// 指定通道最近一次创建的中继
    pub fn relay(&self, number: u32) -> Option<Arc<MockRelay>> {
        self.relays
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|relay| relay.number == number)
            .cloned()
    }
}

impl RelayFactory for MockRelayFactory {
    fn create(
        &self,
        source: &ChannelSource,
        events: RelayEventSender,
    ) -> Result<Arc<dyn UpstreamRelay>> {
        if self.failing.lock().unwrap().contains(&source.number) {
            return Err(RelayError::RelayConstruction(format!(
                "mock construction failure for {}",
                source.number
            )));
        }

        let relay = Arc::new(MockRelay {
            number: source.number,
            events,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            hold_start: self.hold_start.load(Ordering::SeqCst),
            fail_start: self.fail_start.load(Ordering::SeqCst),
            slow_stop: *self.slow_stop.lock().unwrap(),
            release: Notify::new(),
            codec: OnceLock::new(),
            header: OnceLock::new(),
        });
        self.relays.lock().unwrap().push(relay.clone());
        Ok(relay)
    }
}
