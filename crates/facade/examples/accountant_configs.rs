use dp_ledger::{AccountantConfig, DpAccountantConfig, DpEvent, PrivacyAccountant};

fn main() {
    let event = DpEvent::poisson_sampled(0.01, DpEvent::gaussian(1.2)).expect("event");
    for json in [r#"{"family":"rdp"}"#, r#"{"family":"pld"}"#] {
        let config: AccountantConfig = serde_json::from_str(json).expect("config");
        let mut acct = config.create_accountant();
        acct.compose(&event, 100).expect("compose");
        println!("{json}: epsilon @1e-6 = {:.4}", acct.get_epsilon(1e-6).expect("epsilon"));
    }
}
