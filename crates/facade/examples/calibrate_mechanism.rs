use dp_ledger::{
    calibrate_dp_mechanism, dpsgd_event, BracketInterval, DpAccountantConfig, DpEvent,
    PrivacyAccountant, RdpAccountantConfig,
};

fn main() {
    let steps = 256;
    let q = 0.01;
    let delta = 1e-6;
    let target_eps = 3.0;
    let config = RdpAccountantConfig::default();
    let make_event = |s: f64| dpsgd_event(s, steps, q).unwrap_or(DpEvent::NonPrivate);

    let sigma = calibrate_dp_mechanism(
        &config,
        make_event,
        target_eps,
        delta,
        BracketInterval::LowerEndpointAndGuess {
            lower: 0.1,
            initial_guess: 1.0,
        },
        false,
        Some(1e-3),
    )
    .expect("calibrated sigma");

    let mut acct = config.create_accountant();
    acct.compose(&make_event(sigma), 1).expect("compose");
    let eps = acct.get_epsilon(delta).expect("epsilon");
    println!("calibrated sigma: {:.4}", sigma);
    println!("epsilon @ delta={delta}: {:.4}", eps);
}
