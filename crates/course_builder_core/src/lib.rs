pub mod accumulator;
pub mod curriculum;
pub mod domain;
pub mod generation;
pub mod learning;
pub mod ports;
pub mod session;
pub mod stream;

#[cfg(test)]
mod testing;

pub use accumulator::ContentAccumulator;
pub use curriculum::OutlineDefect;
pub use domain::{
    FlatLesson, Lesson, LessonCoord, LessonRequest, LoadedPlan, Module, Outline, PersistedOutline,
    SavedPlan,
};
pub use generation::{GenerationHandle, GenerationUpdate, LessonGenerator};
pub use learning::{Advance, LearningError, LearningResult, LearningState, Phase};
pub use ports::{
    ByteStream, DatabaseService, LessonGenerationService, OutlineGenerationService, PortError,
    PortResult,
};
pub use session::{LearningSession, LessonSelection};
pub use stream::{decode_stream, DecoderConfig, StreamDecoder};
