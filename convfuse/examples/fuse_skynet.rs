// SkyNet deployment example
// Folds every batch norm of the detector into its convolution and checks
// that the fused network still computes the same thing.
//
// Usage:
//   cargo run --example fuse_skynet                      # random weights
//   cargo run --example fuse_skynet -- in.json out.json  # fuse a state file

use convfuse::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = FusionConfig::default()
        .with_policy(FusionPolicy::FuseAvailable)
        .with_verify(true);

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [src, dst] = args.as_slice() {
        let report = convfuse::fuse_state_file(src, dst, &config)?;
        println!("{src} -> {dst}");
        println!("  layers: {} -> {}", report.layers_before, report.layers_after);
        println!("  tensors: {} -> {}", report.tensors_loaded, report.tensors_written);
        print_stats(&report.stats);
        return Ok(());
    }

    println!("=== SkyNet conv/batch-norm fusion ===\n");

    let mut rng = StdRng::seed_from_u64(2024);
    let net = SkyNet::<f32>::with_initializer(|name, shape| {
        let (low, high) = if name.ends_with("running_var") {
            (0.5, 1.5)
        } else {
            (-0.3, 0.3)
        };
        Tensor::zeros(shape).map(|_: &f32| rng.gen_range(low..high))
    })?;
    println!(
        "original: {} layers, {} parameters",
        net.num_layers(),
        net.num_parameters()
    );

    let (fused, stats) = net.fuse(&LayerFusion::with_config(config))?;
    println!(
        "fused:    {} layers, {} parameters",
        fused.num_layers(),
        fused.num_parameters()
    );
    print_stats(&stats);

    let input = Tensor::<f32>::zeros(&[1, 3, 32, 64]).map(|_| rng.gen_range(0.0..1.0));
    let expected = net.forward(&input)?;
    let actual = fused.forward(&input)?;
    println!(
        "\noutput {}, max |fused - original| = {:.3e}",
        actual.shape(),
        ops::max_abs_diff(&actual, &expected)?
    );

    Ok(())
}

fn print_stats(stats: &FusionStats) {
    println!("  pairs fused: {}", stats.fusions_applied);
    for variant in [FusionVariant::Standard, FusionVariant::Depthwise, FusionVariant::Grouped] {
        if let Some(count) = stats.variant_counts.get(&variant) {
            println!("    {variant}: {count}");
        }
    }
    println!("  passed through: {}", stats.passed_through);
    if let Some(err) = stats.max_verification_error {
        println!("  max verification error: {err:.3e}");
    }
}
