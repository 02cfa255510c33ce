//! Agent memory: observations and goal-ranked recommendations.

pub mod observation;
pub mod recommend;
pub mod store;
pub mod text;

pub use observation::{MemoryStats, NewObservation, Observation, ObservationFilter};
pub use recommend::{Recommendation, RecommendationEngine};
pub use store::{MemoryStore, ObservationIter};
