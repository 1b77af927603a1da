// SPDX-License-Identifier: Apache-2.0
//! Demo driver for the patch compile-and-execute pipeline.
//!
//! Builds a small built-in patch (`TimeRoot` wired into a `CircleScene`
//! sink), compiles it once, then steps the deterministic runtime across a
//! time range and prints a per-frame summary. There is no file-based patch
//! format yet (see `DESIGN.md`), so this binary is a fixed demo rather than
//! a general-purpose loader.

#![deny(rust_2018_idioms)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    missing_docs
)]
#![allow(clippy::print_stdout, clippy::print_stderr)]

use anyhow::{Context, Result};
use clap::Parser;

use patch_core::artifact::{RuntimeCtx, Viewport};
use patch_core::compiler::{compile, BlockRegistry};
use patch_core::ident::{make_block_id, BlockSlot};
use patch_core::patch::{Block, BlockTypeId, Literal, ParamBinding, Patch, Wire};
use patch_core::registry::RegistryBuilder;
use patch_core::runtime::{RuntimeConfig, RuntimeState};
use patch_core::stdlib::{register_block_kinds, register_defaults, CIRCLE_SCENE, TIME_ROOT};

/// Compiles and runs the built-in demo patch.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// First frame time, in milliseconds.
    #[clap(long, default_value_t = 0.0)]
    from_ms: f64,

    /// Last frame time, in milliseconds.
    #[clap(long, default_value_t = 2000.0)]
    to_ms: f64,

    /// Number of frames to evaluate across the range.
    #[clap(long, default_value_t = 10)]
    steps: u32,

    /// `TimeRoot` cycle length, in milliseconds.
    #[clap(long, default_value_t = 1000.0)]
    cycle_length: f64,

    /// `CircleScene` base radius, in viewport pixels.
    #[clap(long, default_value_t = 40.0)]
    base_radius: f64,

    /// Deterministic seed threaded into field materialization.
    #[clap(long, default_value_t = 0)]
    seed: u64,

    /// Viewport width, in CSS pixels.
    #[clap(long, default_value_t = 800.0)]
    width: f64,

    /// Viewport height, in CSS pixels.
    #[clap(long, default_value_t = 600.0)]
    height: f64,

    /// Load a patch from a CBOR file instead of running the built-in demo
    /// patch. The file must contain a `Patch` encoded by
    /// `Patch::to_cbor_writer`.
    #[clap(long)]
    patch: Option<std::path::PathBuf>,
}

/// Loads `path` as a CBOR-encoded [`Patch`].
fn load_patch(path: &std::path::Path) -> Result<Patch> {
    let file = std::fs::File::open(path).with_context(|| format!("opening patch file {}", path.display()))?;
    Patch::from_cbor_reader(std::io::BufReader::new(file))
        .with_context(|| format!("decoding patch file {}", path.display()))
}

/// Builds the demo patch: a `TimeRoot` whose `phase` output drives a
/// `CircleScene` sink's radius.
fn build_demo_patch(args: &Args) -> Patch {
    let time_root_id = make_block_id("demo:timeRoot");
    let circle_id = make_block_id("demo:circleScene");

    let mut patch = Patch::new();

    let mut time_root_params = std::collections::BTreeMap::new();
    time_root_params.insert(
        "cycleLength".to_owned(),
        ParamBinding::Literal(Literal::Float(args.cycle_length)),
    );
    patch.blocks.insert(
        time_root_id,
        Block {
            id: time_root_id,
            block_type: BlockTypeId::new(TIME_ROOT),
            params: time_root_params,
        },
    );

    let mut circle_params = std::collections::BTreeMap::new();
    circle_params.insert(
        "baseRadius".to_owned(),
        ParamBinding::Literal(Literal::Float(args.base_radius)),
    );
    patch.blocks.insert(
        circle_id,
        Block {
            id: circle_id,
            block_type: BlockTypeId::new(CIRCLE_SCENE),
            params: circle_params,
        },
    );

    // TimeRoot output slot 2 is `phase`; CircleScene input slot 0 is
    // `radius`. The compiler inserts a phase-to-float adapter automatically.
    patch.wires.push(Wire {
        from: BlockSlot { block: time_root_id, slot: 2 },
        to: BlockSlot { block: circle_id, slot: 0 },
    });
    patch.sinks.push(circle_id);

    patch
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut registry_builder = RegistryBuilder::new();
    register_defaults(&mut registry_builder).context("registering built-in adapters and lenses")?;
    let registry = registry_builder.seal();

    let mut block_registry = BlockRegistry::new();
    register_block_kinds(&mut block_registry);

    let patch = match &args.patch {
        Some(path) => load_patch(path)?,
        None => build_demo_patch(&args),
    };
    let ctx = RuntimeCtx {
        viewport: Viewport { width: args.width, height: args.height, dpr: 1.0 },
    };
    let outcome = compile(&patch, &block_registry, &registry, args.seed, ctx);

    for warning in &outcome.warnings {
        log::warn!("{warning:?}");
    }
    if !outcome.ok {
        for error in &outcome.errors {
            log::error!("{error}");
        }
        anyhow::bail!("patch failed to compile with {} error(s)", outcome.errors.len());
    }
    let ir = outcome.program.context("a successful compile always produces a program")?;

    let config = RuntimeConfig::builder()
        .viewport(ctx.viewport)
        .seed(args.seed)
        .build();
    let mut state = RuntimeState::new(config);

    let steps = args.steps.max(1);
    println!("compiled patch ({} frame(s), {:.1}ms..{:.1}ms)", steps, args.from_ms, args.to_ms);
    for i in 0..steps {
        #[allow(clippy::cast_precision_loss)]
        let f = if steps <= 1 { 0.0 } else { f64::from(i) / f64::from(steps - 1) };
        let t_ms = args.from_ms + (args.to_ms - args.from_ms) * f;
        let frame = patch_core::runtime::execute_frame_resilient(&ir, &mut state, t_ms);
        println!("t={t_ms:>9.2}ms  passes={}  overlays={}", frame.passes.len(), frame.overlays.len());
    }

    Ok(())
}
