//! nnet2 components and the static registry that decodes them by kind tag.
//!
//! Every component is framed as `<XComponent> fields... </XComponent>`.
//! [`read_component`] reads the opening tag, strips the brackets, looks the
//! name up in [`REGISTRY`] and runs that kind's decoder on the fields. The
//! closing tag is checked once for every kind after its fields are decoded.

use super::read_i32;
use crate::error::{FormatError, ModelError, Result};
use crate::primitive::{expect_token, read_float, read_len, read_token, read_typed_vector};
use crate::tagged::{ArrayShape, TaggedArray, decode_tagged_array};
use std::io::BufRead;

/// Closed set of component kinds known to the loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Splice,
    FixedAffine,
    AffinePreconditionedOnline,
    Pnorm,
    Normalize,
    FixedScale,
    FixedBias,
    Softmax,
    Sigmoid,
    Tanh,
    RectifiedLinear,
    SoftHinge,
    Affine,
    AffinePreconditioned,
    BlockAffine,
    Dropout,
    AdditiveNoise,
    SumGroup,
    Permute,
    Dct,
    Maxout,
    Scale,
    SpliceMax,
    Power,
}

impl ComponentKind {
    /// Tag name without angle brackets, e.g. `SpliceComponent`.
    pub fn name(self) -> &'static str {
        REGISTRY
            .iter()
            .find(|entry| entry.kind == self)
            .map_or("", |entry| entry.name)
    }

    /// Look up a kind by its bracket-less tag name.
    pub fn from_name(name: &str) -> Option<Self> {
        lookup(name).map(|entry| entry.kind)
    }
}

type Decoder = fn(&mut dyn BufRead, ComponentKind) -> Result<NnetComponent>;

/// One registry row: tag name and the decoder for its fields.
pub struct ComponentEntry {
    pub kind: ComponentKind,
    pub name: &'static str,
    decode: Decoder,
}

const fn entry(kind: ComponentKind, name: &'static str, decode: Decoder) -> ComponentEntry {
    ComponentEntry { kind, name, decode }
}

/// Every supported component kind with its decoder.
pub static REGISTRY: &[ComponentEntry] = &[
    entry(ComponentKind::Splice, "SpliceComponent", read_splice),
    entry(ComponentKind::FixedAffine, "FixedAffineComponent", read_fixed_affine),
    entry(
        ComponentKind::AffinePreconditionedOnline,
        "AffineComponentPreconditionedOnline",
        read_affine_online,
    ),
    entry(ComponentKind::Pnorm, "PnormComponent", read_pnorm),
    entry(ComponentKind::Normalize, "NormalizeComponent", read_nonlinear),
    entry(ComponentKind::FixedScale, "FixedScaleComponent", read_fixed_scale),
    entry(ComponentKind::FixedBias, "FixedBiasComponent", read_fixed_bias),
    entry(ComponentKind::Softmax, "SoftmaxComponent", read_nonlinear),
    entry(ComponentKind::Sigmoid, "SigmoidComponent", read_nonlinear),
    entry(ComponentKind::Tanh, "TanhComponent", read_nonlinear),
    entry(ComponentKind::RectifiedLinear, "RectifiedLinearComponent", read_nonlinear),
    entry(ComponentKind::SoftHinge, "SoftHingeComponent", read_nonlinear),
    entry(ComponentKind::Affine, "AffineComponent", read_placeholder),
    entry(
        ComponentKind::AffinePreconditioned,
        "AffineComponentPreconditioned",
        read_placeholder,
    ),
    entry(ComponentKind::BlockAffine, "BlockAffineComponent", read_placeholder),
    entry(ComponentKind::Dropout, "DropoutComponent", read_placeholder),
    entry(ComponentKind::AdditiveNoise, "AdditiveNoiseComponent", read_placeholder),
    entry(ComponentKind::SumGroup, "SumGroupComponent", read_placeholder),
    entry(ComponentKind::Permute, "PermuteComponent", read_placeholder),
    entry(ComponentKind::Dct, "DctComponent", read_placeholder),
    entry(ComponentKind::Maxout, "MaxoutComponent", read_placeholder),
    entry(ComponentKind::Scale, "ScaleComponent", read_placeholder),
    entry(ComponentKind::SpliceMax, "SpliceMaxComponent", read_placeholder),
    entry(ComponentKind::Power, "PowerComponent", read_placeholder),
];

fn lookup(name: &str) -> Option<&'static ComponentEntry> {
    REGISTRY.iter().find(|entry| entry.name == name)
}

/// Frame splicing over a set of time offsets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpliceComponent {
    pub input_dim: usize,
    pub context: Vec<i32>,
    /// Trailing input dimensions passed through unspliced
    pub const_component_dim: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FixedAffineComponent {
    pub linear_params: TaggedArray,
    pub bias_params: TaggedArray,
}

/// Affine layer trained with online natural-gradient preconditioning.
#[derive(Clone, Debug, PartialEq)]
pub struct AffinePreconditionedOnlineComponent {
    pub learning_rate: f64,
    pub linear_params: TaggedArray,
    pub bias_params: TaggedArray,
    pub rank_in: usize,
    pub rank_out: usize,
    pub update_period: i32,
    pub num_samples_history: f64,
    pub alpha: f64,
    pub max_change_per_sample: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PnormComponent {
    pub input_dim: usize,
    pub output_dim: usize,
    pub p: f64,
}

/// Element-wise layer with accumulated activation statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct NonlinearComponent {
    pub dim: usize,
    pub value_sum: TaggedArray,
    pub deriv_sum: TaggedArray,
    pub count: f64,
}

/// Decoded component.
#[derive(Clone, Debug, PartialEq)]
pub enum NnetComponent {
    Splice(SpliceComponent),
    FixedAffine(FixedAffineComponent),
    AffinePreconditionedOnline(AffinePreconditionedOnlineComponent),
    Pnorm(PnormComponent),
    /// Normalize, Softmax, Sigmoid, Tanh, RectifiedLinear or SoftHinge
    Nonlinear {
        kind: ComponentKind,
        params: NonlinearComponent,
    },
    FixedScale {
        scales: TaggedArray,
    },
    FixedBias {
        bias: TaggedArray,
    },
    /// Known kind whose fields are not decoded; holds the one token read
    Placeholder {
        kind: ComponentKind,
        token: String,
    },
}

impl NnetComponent {
    pub fn kind(&self) -> ComponentKind {
        match self {
            NnetComponent::Splice(_) => ComponentKind::Splice,
            NnetComponent::FixedAffine(_) => ComponentKind::FixedAffine,
            NnetComponent::AffinePreconditionedOnline(_) => {
                ComponentKind::AffinePreconditionedOnline
            }
            NnetComponent::Pnorm(_) => ComponentKind::Pnorm,
            NnetComponent::Nonlinear { kind, .. } => *kind,
            NnetComponent::FixedScale { .. } => ComponentKind::FixedScale,
            NnetComponent::FixedBias { .. } => ComponentKind::FixedBias,
            NnetComponent::Placeholder { kind, .. } => *kind,
        }
    }

    /// Input dimension, when the decoded fields determine it.
    pub fn input_dim(&self) -> Option<usize> {
        match self {
            NnetComponent::Splice(c) => Some(c.input_dim),
            NnetComponent::FixedAffine(c) => affine_dims(&c.linear_params).map(|(_, cols)| cols),
            NnetComponent::AffinePreconditionedOnline(c) => {
                affine_dims(&c.linear_params).map(|(_, cols)| cols)
            }
            NnetComponent::Pnorm(c) => Some(c.input_dim),
            NnetComponent::Nonlinear { params, .. } => Some(params.dim),
            NnetComponent::FixedScale { scales } => Some(scales.len()),
            NnetComponent::FixedBias { bias } => Some(bias.len()),
            NnetComponent::Placeholder { .. } => None,
        }
    }

    /// Output dimension, when the decoded fields determine it.
    pub fn output_dim(&self) -> Option<usize> {
        match self {
            NnetComponent::Splice(c) => {
                let spliced = c.input_dim.checked_sub(c.const_component_dim)?;
                spliced
                    .checked_mul(c.context.len())?
                    .checked_add(c.const_component_dim)
            }
            NnetComponent::FixedAffine(c) => affine_dims(&c.linear_params).map(|(rows, _)| rows),
            NnetComponent::AffinePreconditionedOnline(c) => {
                affine_dims(&c.linear_params).map(|(rows, _)| rows)
            }
            NnetComponent::Pnorm(c) => Some(c.output_dim),
            other => other.input_dim(),
        }
    }
}

fn affine_dims(linear_params: &TaggedArray) -> Option<(usize, usize)> {
    match linear_params.shape() {
        ArrayShape::Matrix(rows, cols) => Some((rows, cols)),
        ArrayShape::Vector(_) => None,
    }
}

/// Decode one component, from its opening kind tag through its closing tag.
pub fn read_component<R: BufRead>(reader: &mut R) -> Result<NnetComponent> {
    let tag = read_token(reader)?;
    let name = tag
        .strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .unwrap_or(&tag);
    let entry = lookup(name).ok_or_else(|| ModelError::UnknownComponent(name.to_string()))?;

    tracing::trace!(kind = entry.name, "decoding component");
    let component = (entry.decode)(reader, entry.kind)?;
    expect_token(reader, &format!("</{}>", entry.name))?;
    Ok(component)
}

/// Offsets a `<LeftContext>`/`<RightContext>` pair may expand to.
const MAX_SPLICE_WIDTH: i64 = 1 << 16;

fn read_splice(reader: &mut dyn BufRead, _: ComponentKind) -> Result<NnetComponent> {
    expect_token(reader, "<InputDim>")?;
    let input_dim = read_len(reader)?;

    let token = read_token(reader)?;
    let context = match token.as_str() {
        "<LeftContext>" => {
            let left = read_i32(reader)?;
            expect_token(reader, "<RightContext>")?;
            let right = read_i32(reader)?;
            let first = left
                .checked_neg()
                .ok_or(FormatError::Overflow("splice left context"))?;
            if i64::from(right) - i64::from(first) >= MAX_SPLICE_WIDTH {
                return Err(FormatError::Overflow("splice context width").into());
            }
            (first..=right).collect()
        }
        "<Context>" => read_typed_vector::<i32, _>(reader)?,
        _ => return Err(ModelError::SpliceContext(token).into()),
    };

    expect_token(reader, "<ConstComponentDim>")?;
    let const_component_dim = read_len(reader)?;

    Ok(NnetComponent::Splice(SpliceComponent {
        input_dim,
        context,
        const_component_dim,
    }))
}

fn read_fixed_affine(reader: &mut dyn BufRead, _: ComponentKind) -> Result<NnetComponent> {
    expect_token(reader, "<LinearParams>")?;
    let linear_params = decode_tagged_array(reader)?;
    expect_token(reader, "<BiasParams>")?;
    let bias_params = decode_tagged_array(reader)?;

    Ok(NnetComponent::FixedAffine(FixedAffineComponent {
        linear_params,
        bias_params,
    }))
}

fn read_affine_online(reader: &mut dyn BufRead, _: ComponentKind) -> Result<NnetComponent> {
    expect_token(reader, "<LearningRate>")?;
    let learning_rate = read_float(reader)?;
    expect_token(reader, "<LinearParams>")?;
    let linear_params = decode_tagged_array(reader)?;
    expect_token(reader, "<BiasParams>")?;
    let bias_params = decode_tagged_array(reader)?;

    // Older models share one rank for both sides
    let token = read_token(reader)?;
    let (rank_in, rank_out) = match token.as_str() {
        "<Rank>" => {
            let rank = read_len(reader)?;
            (rank, rank)
        }
        "<RankIn>" => {
            let rank_in = read_len(reader)?;
            expect_token(reader, "<RankOut>")?;
            (rank_in, read_len(reader)?)
        }
        _ => return Err(unexpected("<RankIn>", token)),
    };

    let token = read_token(reader)?;
    let update_period = match token.as_str() {
        "<UpdatePeriod>" => {
            let period = read_i32(reader)?;
            expect_token(reader, "<NumSamplesHistory>")?;
            period
        }
        "<NumSamplesHistory>" => 1,
        _ => return Err(unexpected("<NumSamplesHistory>", token)),
    };
    let num_samples_history = read_float(reader)?;

    expect_token(reader, "<Alpha>")?;
    let alpha = read_float(reader)?;
    expect_token(reader, "<MaxChangePerSample>")?;
    let max_change_per_sample = read_float(reader)?;

    Ok(NnetComponent::AffinePreconditionedOnline(
        AffinePreconditionedOnlineComponent {
            learning_rate,
            linear_params,
            bias_params,
            rank_in,
            rank_out,
            update_period,
            num_samples_history,
            alpha,
            max_change_per_sample,
        },
    ))
}

fn read_pnorm(reader: &mut dyn BufRead, _: ComponentKind) -> Result<NnetComponent> {
    expect_token(reader, "<InputDim>")?;
    let input_dim = read_len(reader)?;
    expect_token(reader, "<OutputDim>")?;
    let output_dim = read_len(reader)?;
    expect_token(reader, "<P>")?;
    let p = read_float(reader)?;

    Ok(NnetComponent::Pnorm(PnormComponent {
        input_dim,
        output_dim,
        p,
    }))
}

fn read_nonlinear(reader: &mut dyn BufRead, kind: ComponentKind) -> Result<NnetComponent> {
    expect_token(reader, "<Dim>")?;
    let dim = read_len(reader)?;
    expect_token(reader, "<ValueSum>")?;
    let value_sum = decode_tagged_array(reader)?;
    expect_token(reader, "<DerivSum>")?;
    let deriv_sum = decode_tagged_array(reader)?;
    expect_token(reader, "<Count>")?;
    let count = read_float(reader)?;

    Ok(NnetComponent::Nonlinear {
        kind,
        params: NonlinearComponent {
            dim,
            value_sum,
            deriv_sum,
            count,
        },
    })
}

fn read_fixed_scale(reader: &mut dyn BufRead, _: ComponentKind) -> Result<NnetComponent> {
    expect_token(reader, "<Scales>")?;
    let scales = decode_tagged_array(reader)?;
    Ok(NnetComponent::FixedScale { scales })
}

fn read_fixed_bias(reader: &mut dyn BufRead, _: ComponentKind) -> Result<NnetComponent> {
    expect_token(reader, "<Bias>")?;
    let bias = decode_tagged_array(reader)?;
    Ok(NnetComponent::FixedBias { bias })
}

fn read_placeholder(reader: &mut dyn BufRead, kind: ComponentKind) -> Result<NnetComponent> {
    let token = read_token(reader)?;
    tracing::debug!(?kind, token = token.as_str(), "skipped component fields");
    Ok(NnetComponent::Placeholder { kind, token })
}

fn unexpected(expected: &str, found: String) -> crate::error::Error {
    FormatError::UnexpectedToken {
        expected: expected.to_string(),
        found,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::testing::ModelWriter;
    use std::collections::HashSet;
    use std::io::Cursor;

    fn decode(w: ModelWriter) -> Result<NnetComponent> {
        read_component(&mut Cursor::new(w.into_bytes()))
    }

    #[test]
    fn registry_names_are_unique_and_round_trip() {
        let names: HashSet<_> = REGISTRY.iter().map(|e| e.name).collect();
        assert_eq!(names.len(), REGISTRY.len());

        for entry in REGISTRY {
            assert_eq!(ComponentKind::from_name(entry.name), Some(entry.kind));
            assert_eq!(entry.kind.name(), entry.name);
        }
    }

    #[test]
    fn decodes_splice_with_range_context() {
        let mut w = ModelWriter::default();
        w.token("<SpliceComponent>")
            .token("<InputDim>")
            .int(13)
            .token("<LeftContext>")
            .int(2)
            .token("<RightContext>")
            .int(1)
            .token("<ConstComponentDim>")
            .int(0)
            .token("</SpliceComponent>");

        let component = decode(w).unwrap();

        assert_eq!(
            component,
            NnetComponent::Splice(SpliceComponent {
                input_dim: 13,
                context: vec![-2, -1, 0, 1],
                const_component_dim: 0
            })
        );
        assert_eq!(component.output_dim(), Some(52));
    }

    #[test]
    fn decodes_splice_with_explicit_context() {
        let mut w = ModelWriter::default();
        w.token("<SpliceComponent>")
            .token("<InputDim>")
            .int(10)
            .token("<Context>")
            .int_vector(&[-3, 0, 3])
            .token("<ConstComponentDim>")
            .int(4)
            .token("</SpliceComponent>");

        let component = decode(w).unwrap();

        let NnetComponent::Splice(splice) = &component else {
            panic!("expected splice, got {component:?}");
        };
        assert_eq!(splice.context, vec![-3, 0, 3]);
        assert_eq!(component.output_dim(), Some(6 * 3 + 4));
    }

    #[test]
    fn splice_rejects_unknown_context_token() {
        let mut w = ModelWriter::default();
        w.token("<SpliceComponent>")
            .token("<InputDim>")
            .int(10)
            .token("<Offsets>");

        let err = decode(w).unwrap_err();
        assert!(matches!(err, Error::Model(ModelError::SpliceContext(t)) if t == "<Offsets>"));
    }

    fn splice_range(left: i32, right: i32) -> ModelWriter {
        let mut w = ModelWriter::default();
        w.token("<SpliceComponent>")
            .token("<InputDim>")
            .int(10)
            .token("<LeftContext>")
            .int(left)
            .token("<RightContext>")
            .int(right)
            .token("<ConstComponentDim>")
            .int(0)
            .token("</SpliceComponent>");
        w
    }

    #[test]
    fn splice_left_context_overflow_is_an_error() {
        let err = decode(splice_range(i32::MIN, 0)).unwrap_err();

        assert!(matches!(err, Error::Format(FormatError::Overflow(_))), "{err:?}");
    }

    #[test]
    fn splice_context_width_is_bounded() {
        let err = decode(splice_range(i32::MAX, i32::MAX)).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::Overflow(_))), "{err:?}");

        // negative left context shifts the window to the right
        let NnetComponent::Splice(splice) = decode(splice_range(-1, 2)).unwrap() else {
            panic!("expected splice");
        };
        assert_eq!(splice.context, vec![1, 2]);
    }

    #[test]
    fn splice_output_dim_overflow_is_unknown() {
        let component = NnetComponent::Splice(SpliceComponent {
            input_dim: usize::MAX,
            context: vec![0, 1],
            const_component_dim: 0,
        });

        assert_eq!(component.output_dim(), None);
    }

    #[test]
    fn decodes_fixed_affine_dimensions() {
        let mut w = ModelWriter::default();
        w.token("<FixedAffineComponent>")
            .token("<LinearParams>")
            .float_matrix(2, 3, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0])
            .token("<BiasParams>")
            .float_vector(&[0.5, -0.5])
            .token("</FixedAffineComponent>");

        let component = decode(w).unwrap();

        assert_eq!(component.kind(), ComponentKind::FixedAffine);
        assert_eq!(component.input_dim(), Some(3));
        assert_eq!(component.output_dim(), Some(2));
    }

    fn affine_online(rank: &[(&str, i32)], update_period: Option<i32>) -> ModelWriter {
        let mut w = ModelWriter::default();
        w.token("<AffineComponentPreconditionedOnline>")
            .token("<LearningRate>")
            .float(0.25)
            .token("<LinearParams>")
            .float_matrix(1, 2, &[1.0, 2.0])
            .token("<BiasParams>")
            .float_vector(&[0.0]);
        for &(tag, value) in rank {
            w.token(tag).int(value);
        }
        if let Some(period) = update_period {
            w.token("<UpdatePeriod>").int(period);
        }
        w.token("<NumSamplesHistory>")
            .float(2000.0)
            .token("<Alpha>")
            .float(4.0)
            .token("<MaxChangePerSample>")
            .float(0.125)
            .token("</AffineComponentPreconditionedOnline>");
        w
    }

    #[test]
    fn affine_online_reads_separate_ranks_and_update_period() {
        let w = affine_online(&[("<RankIn>", 20), ("<RankOut>", 80)], Some(4));

        let NnetComponent::AffinePreconditionedOnline(c) = decode(w).unwrap() else {
            panic!("wrong variant");
        };

        assert_eq!((c.rank_in, c.rank_out), (20, 80));
        assert_eq!(c.update_period, 4);
        assert_eq!(c.learning_rate, 0.25);
        assert_eq!(c.num_samples_history, 2000.0);
        assert_eq!(c.alpha, 4.0);
        assert_eq!(c.max_change_per_sample, 0.125);
    }

    #[test]
    fn affine_online_shared_rank_and_default_update_period() {
        let w = affine_online(&[("<Rank>", 30)], None);

        let NnetComponent::AffinePreconditionedOnline(c) = decode(w).unwrap() else {
            panic!("wrong variant");
        };

        assert_eq!((c.rank_in, c.rank_out), (30, 30));
        assert_eq!(c.update_period, 1);
    }

    #[test]
    fn decodes_pnorm() {
        let mut w = ModelWriter::default();
        w.token("<PnormComponent>")
            .token("<InputDim>")
            .int(3000)
            .token("<OutputDim>")
            .int(300)
            .token("<P>")
            .float(2.0)
            .token("</PnormComponent>");

        assert_eq!(
            decode(w).unwrap(),
            NnetComponent::Pnorm(PnormComponent {
                input_dim: 3000,
                output_dim: 300,
                p: 2.0
            })
        );
    }

    #[test]
    fn nonlinear_kinds_share_layout() {
        for name in ["NormalizeComponent", "SoftmaxComponent", "TanhComponent"] {
            let mut w = ModelWriter::default();
            w.token(&format!("<{name}>"))
                .token("<Dim>")
                .int(2)
                .token("<ValueSum>")
                .double_vector(&[0.0, 0.0])
                .token("<DerivSum>")
                .double_vector(&[0.0, 0.0])
                .token("<Count>")
                .float(0.0)
                .token(&format!("</{name}>"));

            let component = decode(w).unwrap();
            assert_eq!(component.kind().name(), name);
            assert_eq!(component.output_dim(), Some(2));
        }
    }

    #[test]
    fn decodes_fixed_scale_and_bias() {
        let mut w = ModelWriter::default();
        w.token("<FixedScaleComponent>")
            .token("<Scales>")
            .float_vector(&[2.0, 3.0])
            .token("</FixedScaleComponent>")
            .token("<FixedBiasComponent>")
            .token("<Bias>")
            .float_vector(&[1.0])
            .token("</FixedBiasComponent>");
        let mut cursor = Cursor::new(w.into_bytes());

        assert_eq!(read_component(&mut cursor).unwrap().input_dim(), Some(2));
        assert_eq!(
            read_component(&mut cursor).unwrap().kind(),
            ComponentKind::FixedBias
        );
    }

    #[test]
    fn placeholder_consumes_one_token() {
        let mut w = ModelWriter::default();
        w.token("<DropoutComponent>")
            .token("<Dim>")
            .token("</DropoutComponent>");

        let component = decode(w).unwrap();

        assert_eq!(
            component,
            NnetComponent::Placeholder {
                kind: ComponentKind::Dropout,
                token: "<Dim>".to_string()
            }
        );
        assert_eq!(component.output_dim(), None);
    }

    #[test]
    fn unknown_kind_names_the_tag() {
        let mut w = ModelWriter::default();
        w.token("<BogusComponent>");

        let err = decode(w).unwrap_err();
        assert!(matches!(
            err,
            Error::Model(ModelError::UnknownComponent(name)) if name == "BogusComponent"
        ));
    }

    #[test]
    fn wrong_closing_tag_fails() {
        let mut w = ModelWriter::default();
        w.token("<FixedBiasComponent>")
            .token("<Bias>")
            .float_vector(&[1.0])
            .token("</FixedScaleComponent>");

        let err = decode(w).unwrap_err();
        assert!(matches!(
            err,
            Error::Format(FormatError::UnexpectedToken { expected, .. })
                if expected == "</FixedBiasComponent>"
        ));
    }
}
