mod pipeline;

pub use pipeline::{FrameAnalysisDone, FrameAnalysisPipeline, PipelineStats};
