use dp_ledger::{dpsgd_event, PldAccountant, PrivacyAccountant};

fn main() {
    let mut acct = PldAccountant::new();
    let event = dpsgd_event(1.0, 100, 0.1).expect("event");
    acct.compose(&event, 1).expect("compose");
    let eps = acct.get_epsilon(1e-6).expect("epsilon");
    println!("PLD epsilon at delta=1e-6: {eps:.3}");
    println!("ledger: {:?}", acct.ledger());
}
