use dp_ledger::{
    clip_by_radius, get_private_average, get_private_count, AveragePrivacyParam,
    CountPrivacyParam, DifferentialPrivacyParam, PrivacyBudgetSplit, RngNoise,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn main() {
    let radius = 1.0;
    let points = ndarray::array![[0.2, 0.4], [0.9, 0.1], [3.0, 4.0], [0.5, 0.5]];
    let clipped = clip_by_radius(points.view(), radius).expect("clip");

    let budget = DifferentialPrivacyParam::new(1.0, 1e-6).expect("budget");
    let split = PrivacyBudgetSplit::default();
    let count_param = CountPrivacyParam::from_budget(&budget, &split, 0).expect("count param");
    let average_param =
        AveragePrivacyParam::from_budget(&budget, &split, radius).expect("average param");

    let mut noise = RngNoise::new(ChaCha8Rng::seed_from_u64(42));
    let count = get_private_count(clipped.points.nrows() as i64, &count_param, &mut noise)
        .expect("count")
        .max(1);
    let average = get_private_average(clipped.points.view(), count, &average_param, 2, &mut noise)
        .expect("average");

    println!("clipped {} points", clipped.num_clipped);
    println!("private count: {count}");
    println!("private average: {average}");
}
