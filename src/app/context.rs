//! 拦截会话（DI 容器）
//!
//! 统一持有一次生命周期内共享的组件：模式表、事件通道、监听器和平台管理器。
//! 每次安装都新建一个会话，不同会话之间不共享状态。

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::config::{AppConfig, build_pattern_table};
use crate::endpoint::EndpointPatternTable;
use crate::error::{InterceptError, Result};
use crate::events::{EventDispatcher, EventReceiver, InterceptEvent};
use crate::handlers::{Collaborators, PlatformManager};
use crate::interceptor::{Fetch, InterceptingFetch, InterceptorContext};
use crate::logging::{LogComponent, LogStage};
use crate::monitor::{ListenerFilter, ListenerId, NetworkRequestMonitor};
use crate::{ldebug, linfo};

/// 拦截会话
pub struct InterceptSession {
    config: Arc<AppConfig>,
    table: Arc<EndpointPatternTable>,
    dispatcher: EventDispatcher,
    receiver: Mutex<Option<EventReceiver>>,
    monitor: Arc<NetworkRequestMonitor>,
    manager: Arc<PlatformManager>,
    manager_listener: ListenerId,
    /// 停止信号
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    shutdown_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl std::fmt::Debug for InterceptSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptSession")
            .field("monitor", &self.monitor)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl InterceptSession {
    /// 组装会话；平台管理器注册为监听器
    pub fn new(config: AppConfig, collaborators: &Collaborators) -> Result<Self> {
        let table = Arc::new(build_pattern_table(&config)?);
        let (dispatcher, receiver) = EventDispatcher::channel();
        let monitor = Arc::new(NetworkRequestMonitor::new());
        let manager = Arc::new(PlatformManager::new(collaborators));

        let routed = Arc::clone(&manager);
        let manager_listener = monitor.add_listener(
            ListenerFilter::Any,
            Arc::new(move |event: &InterceptEvent| routed.route(event)),
        );

        ldebug!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "session_created",
            "拦截会话已创建",
            custom_patterns = config.patterns.is_some()
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        Ok(Self {
            config: Arc::new(config),
            table,
            dispatcher,
            receiver: Mutex::new(Some(receiver)),
            monitor,
            manager,
            manager_listener,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
        })
    }

    /// 包装原始请求实现
    pub fn install<F: Fetch>(&self, original: F) -> InterceptingFetch<F> {
        InterceptingFetch::install(
            original,
            Arc::clone(&self.table),
            self.dispatcher.clone(),
            InterceptorContext::from(&self.config.interceptor),
        )
    }

    /// 消费事件直到 `shutdown`；停止前把已排队的事件处理完
    pub async fn run(&self) -> Result<()> {
        let mut receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| InterceptError::internal("会话已经在运行或已结束"))?;
        let mut shutdown_rx = self
            .shutdown_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| InterceptError::internal("会话已经在运行或已结束"))?;

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "session_running",
            "开始处理拦截事件"
        );

        loop {
            tokio::select! {
                biased;
                event = receiver.recv() => match event {
                    Some(event) => {
                        self.monitor.dispatch(&event);
                    }
                    None => break,
                },
                _ = &mut shutdown_rx => {
                    receiver.close();
                    while let Some(event) = receiver.recv().await {
                        self.monitor.dispatch(&event);
                    }
                    break;
                }
            }
        }

        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Main,
            "session_stopped",
            "拦截会话已停止"
        );
        Ok(())
    }

    /// 发送停止信号；在 `run` 之前调用时 `run` 处理完积压事件后立即返回
    pub fn shutdown(&self) {
        let sender = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// 已加载的配置
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 端点模式表
    #[must_use]
    pub fn table(&self) -> &EndpointPatternTable {
        &self.table
    }

    /// 事件监控器
    #[must_use]
    pub const fn monitor(&self) -> &Arc<NetworkRequestMonitor> {
        &self.monitor
    }

    /// 平台路由
    #[must_use]
    pub const fn manager(&self) -> &Arc<PlatformManager> {
        &self.manager
    }

    /// 平台管理器对应的监听器句柄
    #[must_use]
    pub const fn manager_listener(&self) -> ListenerId {
        self.manager_listener
    }
}
