//! # 网络请求监听器
//!
//! 接收拦截事件并同步分发给已注册的监听器。监听器按注册顺序调用，
//! 单个监听器 panic 不会影响其他监听器。

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use regex::Regex;

use crate::events::{EventReceiver, ExchangeType, InterceptEvent};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lerror, linfo};

/// 监听器回调
pub type Listener = Arc<dyn Fn(&InterceptEvent) + Send + Sync>;

/// 监听器句柄，用于注销
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// 监听器过滤条件
#[derive(Debug, Clone)]
pub enum ListenerFilter {
    /// 所有事件
    Any,
    /// 指定类型
    EventType(ExchangeType),
    /// URL 包含子串
    UrlContains(String),
    /// URL 匹配正则
    UrlRegex(Regex),
}

impl ListenerFilter {
    /// 事件是否满足条件
    #[must_use]
    pub fn matches(&self, event: &InterceptEvent) -> bool {
        match self {
            Self::Any => true,
            Self::EventType(kind) => event.kind() == *kind,
            Self::UrlContains(needle) => event.url().is_some_and(|url| url.contains(needle.as_str())),
            Self::UrlRegex(re) => event.url().is_some_and(|url| re.is_match(url)),
        }
    }
}

struct Registration {
    id: ListenerId,
    filter: ListenerFilter,
    listener: Listener,
}

/// 网络请求监听器
#[derive(Default)]
pub struct NetworkRequestMonitor {
    listeners: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    ready: AtomicBool,
}

impl std::fmt::Debug for NetworkRequestMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRequestMonitor")
            .field("listeners", &self.listener_count())
            .field("ready", &self.is_interceptor_ready())
            .finish()
    }
}

impl NetworkRequestMonitor {
    /// 空监控器，尚未就绪
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册监听器
    pub fn add_listener(&self, filter: ListenerFilter, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        listeners.push(Registration {
            id,
            filter,
            listener,
        });
        id
    }

    /// 注销监听器，返回是否存在
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    /// 已注册的监听器数
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// 是否已收到 `injectionComplete`
    #[must_use]
    pub fn is_interceptor_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// 同步分发一个事件，返回被调用的监听器数量
    pub fn dispatch(&self, event: &InterceptEvent) -> usize {
        if event.kind() == ExchangeType::InjectionComplete && !self.ready.swap(true, Ordering::AcqRel) {
            linfo!(
                "system",
                LogStage::Injection,
                LogComponent::Monitor,
                "interceptor_ready",
                "拦截器就绪",
                platform = %event.platform()
            );
        }

        // 复制出匹配的回调，调用期间不持有锁，监听器内可以再注册 / 注销
        let matched: Vec<(ListenerId, Listener)> = self
            .listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|r| r.filter.matches(event))
            .map(|r| (r.id, Arc::clone(&r.listener)))
            .collect();

        let id = event.detail.data.exchange_id.as_deref().unwrap_or("-");
        for (listener_id, listener) in &matched {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                lerror!(
                    id,
                    LogStage::Dispatch,
                    LogComponent::Monitor,
                    "listener_panicked",
                    "监听器执行失败，已跳过",
                    listener = listener_id.0,
                    event_type = event.kind().as_str()
                );
            }
        }
        matched.len()
    }

    /// 按顺序消费事件直到通道关闭
    pub async fn run(&self, mut receiver: EventReceiver) {
        while let Some(event) = receiver.recv().await {
            self.dispatch(&event);
        }
        ldebug!(
            "system",
            LogStage::Shutdown,
            LogComponent::Monitor,
            "channel_closed",
            "事件通道已关闭，停止监听"
        );
    }
}
