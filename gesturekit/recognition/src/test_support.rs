//! Fixtures shared by unit tests.

use crate::{
    data::{ClassificationData, RegressionData, UnlabelledData},
    module::Module,
    random::Random,
};

/// Two well separated gaussian classes.
pub fn gauss_classes(num_samples: usize, num_dimensions: usize, seed: u64) -> ClassificationData {
    ClassificationData::generate_gauss(
        num_samples,
        2,
        num_dimensions,
        10.0,
        0.5,
        &mut Random::with_seed(seed),
    )
    .unwrap()
}

/// Three tight blobs on a line: labels 1, 2, 3 around x = 0, 10, 20.
pub fn three_blobs() -> ClassificationData {
    let mut data = ClassificationData::new(2);
    let mut random = Random::with_seed(17);
    for (label, centre) in [(1, 0.0), (2, 10.0), (3, 20.0)] {
        for _ in 0..15 {
            data.add_sample(
                label,
                vec![random.gauss(centre, 0.3), random.gauss(0.0, 0.3)],
            )
            .unwrap();
        }
    }
    data
}

/// `y = 2 x0 - x1 + 1` sampled on a grid.
pub fn plane() -> RegressionData {
    let mut data = RegressionData::new(2, 1);
    for i in 0..8 {
        for j in 0..8 {
            let (x0, x1) = (f64::from(i) / 8.0, f64::from(j) / 8.0);
            data.add_sample(vec![x0, x1], vec![2.0f64.mul_add(x0, -x1) + 1.0])
                .unwrap();
        }
    }
    data
}

/// Inputs of [`three_blobs`] without labels.
pub fn blob_rows() -> UnlabelledData {
    let data = three_blobs();
    UnlabelledData::from_rows(data.samples().iter().map(|s| s.features.clone()).collect())
        .unwrap()
}

/// Saves `module` to memory and loads it into `fresh`.
pub fn round_trip<M: Module + ?Sized, N: Module + ?Sized>(module: &M, fresh: &mut N) {
    let mut bytes = Vec::new();
    module.save(&mut bytes).unwrap();
    fresh.load(&mut bytes.as_slice()).unwrap();
}
