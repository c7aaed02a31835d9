//! # 流式响应重建
//!
//! 把 `data: {...}` 形式的 SSE 增量帧还原成完整的助手消息，
//! 消息由有序的分段（思考 / 回复）组成，并记录每个分段的完成状态。
//!
//! 状态机（概念上）：空闲 → `add` 打开消息 → 下一个 `add` 或 `[DONE]` 隐式结束。
//! 操作严格按到达顺序应用，不重排、不批处理。

pub mod delta;
pub mod processor;
pub mod state;

pub use delta::{DeltaOp, DeltaParser, MessageStart, PatchOp, StepKind, StreamDialect};
pub use processor::{ProcessorStats, StreamingDeltaProcessor};
pub use state::{MessageStep, STATUS_FINISHED, StreamingMessageState};
