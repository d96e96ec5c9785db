use crate::emu::{ShapingConfig, shaping_args};

fn limit_of(args: &[String]) -> &str {
    let i = args.iter().position(|a| a == "limit").expect("limit flag");
    &args[i + 1]
}

#[test]
fn netem_args_size_queue_from_bdp() {
    let args = shaping_args("h1-eth0", &ShapingConfig::rate(100));
    assert_eq!(
        args,
        [
            "qdisc", "replace", "dev", "h1-eth0", "root", "netem", "limit", "666", "rate",
            "100mbit"
        ]
    );

    let delayed = ShapingConfig {
        delay_ms: Some(5),
        ..ShapingConfig::rate(8)
    };
    let args = shaping_args("s1-eth2", &delayed);
    assert_eq!(limit_of(&args), "20");
    assert!(args.windows(2).any(|w| w[0] == "delay" && w[1] == "5ms"));
}

#[test]
fn huge_rates_saturate_instead_of_overflowing() {
    let args = shaping_args("s2-eth0", &ShapingConfig::rate(u64::MAX));
    assert_eq!(limit_of(&args), "4294967294");
    assert_eq!(args.last().map(String::as_str), Some("18446744073709551615mbit"));
}
