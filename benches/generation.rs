use bitcoin::{secp256k1::Secp256k1, Amount};
use consensus_fuzz::{
    template::Signing, tx::TxShell, Generator, GeneratorConfig, Mode, Template, TemplateKind,
    VectorFormat,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rngs::StdRng, SeedableRng};

pub fn template_bench(c: &mut Criterion) {
    let secp = Secp256k1::new();
    let mut rng = StdRng::seed_from_u64(1);
    let shell = TxShell::random(&mut rng, &secp, VectorFormat::Witness);

    let mut group = c.benchmark_group("context");
    for kind in TemplateKind::ALL {
        let template = Template::random(kind, &mut rng, &secp);
        let name = format!("{kind:?}");
        group.bench_with_input(BenchmarkId::new("sign", name), &template, |b, template| {
            b.iter(|| {
                template
                    .context(&Signing::new(&secp, shell.transaction(), 0, Amount::from_sat(1)))
                    .expect("context")
            });
        });
    }
    group.finish();
}

pub fn generator_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_vector");
    for mode in [Mode::Verify, Mode::Less] {
        let mut generator = Generator::new(GeneratorConfig {
            mode,
            seed: Some(7),
            ..GeneratorConfig::default()
        });
        group.bench_function(format!("{mode:?}"), |b| {
            b.iter(|| generator.next_vector().expect("vector").id());
        });
    }
    group.finish();
}

#[cfg(feature = "libconsensus")]
pub fn reference_bench(c: &mut Criterion) {
    let mut generator = Generator::new(GeneratorConfig {
        mode: Mode::Less,
        seed: Some(11),
        ..GeneratorConfig::default()
    });
    let vectors: Vec<_> = (0..64)
        .map(|_| generator.next_vector().expect("vector"))
        .collect();
    c.bench_function("libbitcoinconsensus", |b| {
        b.iter(|| {
            vectors
                .iter()
                .filter(|vector| consensus_fuzz::libconsensus::verify_vector(vector))
                .count()
        });
    });
}

#[cfg(not(feature = "libconsensus"))]
criterion_group!(benches, template_bench, generator_bench);
#[cfg(feature = "libconsensus")]
criterion_group!(benches, template_bench, generator_bench, reference_bench);
criterion_main!(benches);
