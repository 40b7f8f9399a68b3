use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

const CATALOG: &str = r#"{"step":"fees","booking_fee":"500","fine_amount":"100","onboarding_fee":"1000"}
{"step":"category","label":"c","name":"Cleaning","min_pay_rate":"100","max_pay_rate":"300"}"#;

#[test]
fn test_malformed_lines_are_skipped() {
    let mut scenario = tempfile::NamedTempFile::new().unwrap();
    writeln!(scenario, "{CATALOG}").unwrap();
    // Unknown step
    writeln!(scenario, r#"{{"step":"teleport","booking":"b1"}}"#).unwrap();
    // Not JSON at all
    writeln!(scenario, "book b1 for alice").unwrap();
    // Missing a required field
    writeln!(scenario, r#"{{"step":"book","label":"b0","customer":"alice"}}"#).unwrap();
    // Valid booking
    writeln!(scenario, r#"{{"step":"book","label":"b1","customer":"alice","category":"c"}}"#).unwrap();

    let mut cmd = Command::new(cargo_bin!("marketplace-ledger"));
    cmd.arg(scenario.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading step on line 3"))
        .stderr(predicate::str::contains("Error reading step on line 4"))
        .stderr(predicate::str::contains("Error reading step on line 5"))
        .stdout(predicate::str::contains(",pending,pending,pending,500,,false,none,").count(1));
}

#[test]
fn test_failed_steps_do_not_stop_the_run() {
    let mut scenario = tempfile::NamedTempFile::new().unwrap();
    writeln!(scenario, "{CATALOG}").unwrap();
    writeln!(scenario, r#"{{"step":"book","label":"b1","customer":"alice","category":"c"}}"#).unwrap();
    // Cannot assign before the upfront fee is paid
    writeln!(scenario, r#"{{"step":"assign","booking":"b1","technician":"tom"}}"#).unwrap();
    // Unknown label
    writeln!(scenario, r#"{{"step":"cancel","booking":"nope"}}"#).unwrap();
    // Pay rate outside the category band
    writeln!(
        scenario,
        r#"{{"step":"onboard","label":"t1","applicant":"tech@example.com","category":"c","pay_rate":"450"}}"#
    )
    .unwrap();
    writeln!(scenario, r#"{{"step":"verify_initial","booking":"b1","payment_id":"pay_1"}}"#).unwrap();

    let mut cmd = Command::new(cargo_bin!("marketplace-ledger"));
    cmd.arg(scenario.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains(
            "Error applying step on line 4: Illegal transition: cannot assign a booking in status pending",
        ))
        .stderr(predicate::str::contains("Error applying step on line 5"))
        .stderr(predicate::str::contains("Error applying step on line 6: Validation error"))
        .stdout(predicate::str::contains(",confirmed,paid,pending,500,,false,none,"))
        .stdout(predicate::str::contains("tech@example.com").not());
}
