//! Segment selection as an FFmpeg filter specification.
//!
//! Construction and serialization are separate steps: [`build_filter_spec`]
//! produces a structured [`FilterSpec`], and [`FilterSpec::to_args`] renders
//! it into FFmpeg's argument syntax.
//!
//! A single segment takes the fast path: an input seek plus a duration limit,
//! so the demuxer skips straight to the range instead of decoding everything
//! before it. Several segments become a labelled graph:
//!
//! ```text
//! [0:v]trim=start=S0:end=E0,setpts=PTS-STARTPTS[v0];
//! [0:a]atrim=start=S0:end=E0,asetpts=PTS-STARTPTS[a0];
//! ...
//! [v0][v1]concat=n=2:v=1:a=0[outv];
//! [a0][a1]concat=n=2:v=0:a=1[outa]
//! ```

use std::fmt;

use vcut_models::{Segment, ValidatedSegmentSet};

/// Label of the final video stream.
pub const OUTPUT_VIDEO_LABEL: &str = "outv";
/// Label of the final audio stream.
pub const OUTPUT_AUDIO_LABEL: &str = "outa";

/// Kind of elementary stream a filter operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    /// Stream specifier of the first input for this kind.
    fn input_pad(&self) -> &'static str {
        match self {
            StreamKind::Video => "0:v",
            StreamKind::Audio => "0:a",
        }
    }

    fn label_prefix(&self) -> char {
        match self {
            StreamKind::Video => 'v',
            StreamKind::Audio => 'a',
        }
    }

    /// Request-scoped label for segment `index`, e.g. `v0`, `a3`.
    pub fn segment_label(&self, index: usize) -> String {
        format!("{}{}", self.label_prefix(), index)
    }
}

/// A single filter in a chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Keep `[start, end)` of the stream.
    Trim { kind: StreamKind, start: f64, end: f64 },
    /// Rebase timestamps so the stream starts at zero.
    ResetTimestamps { kind: StreamKind },
    /// Join `inputs` streams of one kind end to end.
    Concat { kind: StreamKind, inputs: usize },
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Trim { kind: StreamKind::Video, start, end } => {
                write!(f, "trim=start={}:end={}", start, end)
            }
            Filter::Trim { kind: StreamKind::Audio, start, end } => {
                write!(f, "atrim=start={}:end={}", start, end)
            }
            Filter::ResetTimestamps { kind: StreamKind::Video } => write!(f, "setpts=PTS-STARTPTS"),
            Filter::ResetTimestamps { kind: StreamKind::Audio } => write!(f, "asetpts=PTS-STARTPTS"),
            Filter::Concat { kind, inputs } => {
                let (v, a) = match kind {
                    StreamKind::Video => (1, 0),
                    StreamKind::Audio => (0, 1),
                };
                write!(f, "concat=n={}:v={}:a={}", inputs, v, a)
            }
        }
    }
}

/// A filter chain with labelled inputs and outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub inputs: Vec<String>,
    pub filters: Vec<Filter>,
    pub outputs: Vec<String>,
}

impl fmt::Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for input in &self.inputs {
            write!(f, "[{}]", input)?;
        }
        let chain: Vec<String> = self.filters.iter().map(ToString::to_string).collect();
        write!(f, "{}", chain.join(","))?;
        for output in &self.outputs {
            write!(f, "[{}]", output)?;
        }
        Ok(())
    }
}

/// A complete multi-stream filter graph.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    pub nodes: Vec<FilterNode>,
    /// Labels mapped into the output file, in order.
    pub outputs: Vec<String>,
    /// Expected length of the result in seconds.
    pub output_duration: f64,
}

impl FilterGraph {
    /// Render in `-filter_complex` syntax.
    pub fn serialize(&self) -> String {
        self.nodes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// What the engine is asked to do with the input.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSpec {
    /// Seek to `start` and keep `duration` seconds.
    Trim { start: f64, duration: f64 },
    /// Trim every segment and concatenate the pieces.
    Graph(FilterGraph),
}

/// Arguments contributed by a [`FilterSpec`], split by their position
/// relative to `-i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterArgs {
    pub input_args: Vec<String>,
    pub output_args: Vec<String>,
}

impl FilterSpec {
    pub fn is_fast_path(&self) -> bool {
        matches!(self, FilterSpec::Trim { .. })
    }

    /// Expected length of the result in seconds.
    pub fn output_duration(&self) -> f64 {
        match self {
            FilterSpec::Trim { duration, .. } => *duration,
            FilterSpec::Graph(graph) => graph.output_duration,
        }
    }

    /// Render into FFmpeg arguments, including stream mapping.
    pub fn to_args(&self) -> FilterArgs {
        match self {
            FilterSpec::Trim { start, duration } => FilterArgs {
                input_args: vec![
                    "-ss".to_string(),
                    start.to_string(),
                    "-t".to_string(),
                    duration.to_string(),
                ],
                output_args: Vec::new(),
            },
            FilterSpec::Graph(graph) => {
                let mut output_args = vec!["-filter_complex".to_string(), graph.serialize()];
                for label in &graph.outputs {
                    output_args.push("-map".to_string());
                    output_args.push(format!("[{}]", label));
                }
                FilterArgs {
                    input_args: Vec::new(),
                    output_args,
                }
            }
        }
    }
}

/// Build the filter specification for a validated segment set.
pub fn build_filter_spec(segments: &ValidatedSegmentSet) -> FilterSpec {
    match segments.as_slice() {
        [only] => FilterSpec::Trim {
            start: only.start,
            duration: only.duration(),
        },
        many => FilterSpec::Graph(build_concat_graph(many)),
    }
}

fn trim_node(kind: StreamKind, index: usize, segment: &Segment) -> FilterNode {
    FilterNode {
        inputs: vec![kind.input_pad().to_string()],
        filters: vec![
            Filter::Trim {
                kind,
                start: segment.start,
                end: segment.end,
            },
            Filter::ResetTimestamps { kind },
        ],
        outputs: vec![kind.segment_label(index)],
    }
}

fn concat_node(kind: StreamKind, count: usize, output: &str) -> FilterNode {
    FilterNode {
        inputs: (0..count).map(|i| kind.segment_label(i)).collect(),
        filters: vec![Filter::Concat { kind, inputs: count }],
        outputs: vec![output.to_string()],
    }
}

fn build_concat_graph(segments: &[Segment]) -> FilterGraph {
    let mut nodes = Vec::with_capacity(segments.len() * 2 + 2);

    for (index, segment) in segments.iter().enumerate() {
        nodes.push(trim_node(StreamKind::Video, index, segment));
        nodes.push(trim_node(StreamKind::Audio, index, segment));
    }

    nodes.push(concat_node(StreamKind::Video, segments.len(), OUTPUT_VIDEO_LABEL));
    nodes.push(concat_node(StreamKind::Audio, segments.len(), OUTPUT_AUDIO_LABEL));

    FilterGraph {
        nodes,
        outputs: vec![OUTPUT_VIDEO_LABEL.to_string(), OUTPUT_AUDIO_LABEL.to_string()],
        output_duration: segments.iter().map(Segment::duration).sum(),
    }
}
