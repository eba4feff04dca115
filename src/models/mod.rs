//! Domain models shared across the entire Perpclaw pipeline.

pub mod candle;
pub mod decision;
pub mod order;
pub mod position;

pub use candle::{Candle, IndicatorSet, RealtimeQuote, TimeframeSnapshot};
pub use decision::{Action, Decision, DecisionSource};
pub use order::{ConditionalKind, ExecutedOrder, OrderIntent, OrderSide, OrderStatus};
pub use position::{AccountSummary, Position, PositionSide};
