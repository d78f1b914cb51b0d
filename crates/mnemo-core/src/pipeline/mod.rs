//! Content transcoding pipeline.
//!
//! An ordered list of independently testable layers, each rewriting one
//! aspect of the local markup dialect into the peer's. Layers run in
//! strictly descending priority order; a failing layer is downgraded to a
//! warning and its input passes through unchanged, so one bad layer never
//! blocks the others or the record.

mod callouts;
mod highlight;
mod links;
pub mod mask;
mod math;

use tracing::warn;

use crate::config::SyncConfig;
use crate::error::Result;

pub use callouts::CalloutLayer;
pub use highlight::HighlightLayer;
pub use links::{deep_link, LinkLayer};
pub use math::MathLayer;

/// Per-record context handed to every layer
pub struct ConvertContext<'a> {
    pub config: &'a SyncConfig,
    /// Vault-relative path of the source note, when known
    pub source_path: Option<&'a str>,
}

/// Result of one layer over one piece of content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerOutput {
    pub content: String,
    pub warnings: Vec<String>,
    /// Number of rewrites the layer performed
    pub changes: usize,
}

impl LayerOutput {
    /// Pass-through output for a layer that found nothing to do
    #[must_use]
    pub fn unchanged(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            warnings: Vec::new(),
            changes: 0,
        }
    }
}

/// One pluggable transformation layer
pub trait ConversionLayer: Send + Sync {
    /// Stable layer name, used in warnings and logs
    fn name(&self) -> &'static str;
    /// Layers run in descending priority order
    fn priority(&self) -> i32;
    /// Whether configuration enables this layer
    fn enabled(&self, config: &SyncConfig) -> bool;
    /// Rewrite content; errors are downgraded to warnings by the pipeline
    fn convert(&self, content: &str, ctx: &ConvertContext<'_>) -> Result<LayerOutput>;
}

/// Final content plus the union of all layers' warnings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    pub content: String,
    pub warnings: Vec<String>,
    pub changes: usize,
}

/// Ordered collection of conversion layers
pub struct ContentPipeline {
    layers: Vec<Box<dyn ConversionLayer>>,
}

impl ContentPipeline {
    /// Pipeline with the standard four layers
    #[must_use]
    pub fn standard() -> Self {
        Self::with_layers(vec![
            Box::new(MathLayer),
            Box::new(LinkLayer),
            Box::new(CalloutLayer),
            Box::new(HighlightLayer),
        ])
    }

    /// Pipeline over an arbitrary layer set; sorts by descending priority
    #[must_use]
    pub fn with_layers(mut layers: Vec<Box<dyn ConversionLayer>>) -> Self {
        layers.sort_by_key(|layer| std::cmp::Reverse(layer.priority()));
        Self { layers }
    }

    /// Run all enabled layers over the content in priority order.
    ///
    /// Warnings never abort the record; an erroring layer contributes a
    /// warning and its input flows on to the next layer.
    #[must_use]
    pub fn run(&self, content: &str, ctx: &ConvertContext<'_>) -> PipelineOutput {
        let mut current = content.to_string();
        let mut warnings = Vec::new();
        let mut changes = 0;

        for layer in &self.layers {
            if !layer.enabled(ctx.config) {
                continue;
            }
            match layer.convert(&current, ctx) {
                Ok(output) => {
                    current = output.content;
                    warnings.extend(output.warnings);
                    changes += output.changes;
                }
                Err(error) => {
                    warn!(layer = layer.name(), %error, "conversion layer failed");
                    warnings.push(format!("{} layer failed: {error}", layer.name()));
                }
            }
        }

        PipelineOutput {
            content: current,
            warnings,
            changes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct FailingLayer;

    impl ConversionLayer for FailingLayer {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn priority(&self) -> i32 {
            35
        }
        fn enabled(&self, _config: &SyncConfig) -> bool {
            true
        }
        fn convert(&self, _content: &str, _ctx: &ConvertContext<'_>) -> Result<LayerOutput> {
            Err(Error::InvalidInput("boom".to_string()))
        }
    }

    struct TagLayer(&'static str, i32);

    impl ConversionLayer for TagLayer {
        fn name(&self) -> &'static str {
            self.0
        }
        fn priority(&self) -> i32 {
            self.1
        }
        fn enabled(&self, _config: &SyncConfig) -> bool {
            true
        }
        fn convert(&self, content: &str, _ctx: &ConvertContext<'_>) -> Result<LayerOutput> {
            Ok(LayerOutput {
                content: format!("{content}>{}", self.0),
                warnings: Vec::new(),
                changes: 1,
            })
        }
    }

    fn ctx<'a>(config: &'a SyncConfig) -> ConvertContext<'a> {
        ConvertContext {
            config,
            source_path: None,
        }
    }

    #[test]
    fn layers_run_in_descending_priority_order() {
        let pipeline = ContentPipeline::with_layers(vec![
            Box::new(TagLayer("low", 1)),
            Box::new(TagLayer("high", 9)),
            Box::new(TagLayer("mid", 5)),
        ]);
        let config = SyncConfig::default();
        let out = pipeline.run("x", &ctx(&config));
        assert_eq!(out.content, "x>high>mid>low");
        assert_eq!(out.changes, 3);
    }

    #[test]
    fn failing_layer_becomes_warning_and_content_flows_on() {
        let pipeline = ContentPipeline::with_layers(vec![
            Box::new(TagLayer("first", 40)),
            Box::new(FailingLayer),
            Box::new(TagLayer("last", 10)),
        ]);
        let config = SyncConfig::default();
        let out = pipeline.run("x", &ctx(&config));
        assert_eq!(out.content, "x>first>last");
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("failing layer failed"));
    }

    #[test]
    fn disabled_layers_are_skipped() {
        let pipeline = ContentPipeline::standard();
        let config = SyncConfig {
            layers: crate::config::LayerFlags {
                math: false,
                ..crate::config::LayerFlags::default()
            },
            ..SyncConfig::default()
        };
        let out = pipeline.run("$x$ and ==y==", &ctx(&config));
        assert!(out.content.contains("$x$"));
        assert!(out.content.contains("<b><u>y</u></b>"));
    }

    #[test]
    fn standard_pipeline_round_trip_record() {
        // One math expression, one cross-reference, one callout: the
        // documented lossy transforms preserve text content.
        let source = "What is $V = IR$?\nSee [[Ohm's Law|the law]].\n> [!note] Hint\n> Volts.";
        let pipeline = ContentPipeline::standard();
        let config = SyncConfig {
            deep_link_refs: false,
            ..SyncConfig::default()
        };
        let out = pipeline.run(source, &ctx(&config));

        assert!(out.content.contains("\\(V = IR\\)"));
        assert!(out.content.contains("the law"));
        assert!(out.content.contains("callout-note"));
        assert!(out.content.contains("Volts."));
        assert!(out.warnings.is_empty());
        assert_eq!(out.changes, 3);

        // Running the converted output again must be a fixpoint for the
        // math and link layers (no delimiters or wiki syntax remain).
        let again = pipeline.run(&out.content, &ctx(&config));
        assert_eq!(again.content, out.content);
    }

    #[test]
    fn code_fence_protects_all_layers() {
        let source = "```\n$x$ [[link]] ==h==\n```";
        let pipeline = ContentPipeline::standard();
        let config = SyncConfig::default();
        let out = pipeline.run(source, &ctx(&config));
        assert_eq!(out.content, source);
        assert_eq!(out.changes, 0);
    }
}
