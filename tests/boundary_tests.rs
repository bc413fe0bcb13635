use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_boundary_numerical_values() {
    let batch = tempfile::NamedTempFile::new().unwrap();
    let mut wtr = csv::Writer::from_path(batch.path()).unwrap();
    wtr.write_record(["type", "account", "counterparty", "amount", "currency", "key"])
        .unwrap();
    wtr.write_record(["external", "bank", "", "", "USD", ""])
        .unwrap();
    wtr.write_record(["open", "whale", "", "", "USD", ""])
        .unwrap();
    // close to what an i64 of cents can carry
    wtr.write_record(["pay", "bank", "whale", "90000000000000000.00", "USD", "big"])
        .unwrap();
    wtr.flush().unwrap();
    drop(wtr);

    let mut cmd = Command::new(cargo_bin!("creoledger"));
    cmd.arg(batch.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "account,currency,kind,status,balance,version",
        ))
        .stdout(predicate::str::contains(
            "whale,USD,internal,active,90000000000000000.00,",
        ));
}

#[test]
fn test_currency_exponents() {
    let batch = tempfile::NamedTempFile::new().unwrap();
    let mut wtr = csv::Writer::from_path(batch.path()).unwrap();
    wtr.write_record(["type", "account", "counterparty", "amount", "currency", "key"])
        .unwrap();
    wtr.write_record(["external", "yen-bank", "", "", "JPY", ""])
        .unwrap();
    wtr.write_record(["open", "taro", "", "", "JPY", ""]).unwrap();
    wtr.write_record(["pay", "yen-bank", "taro", "5000", "JPY", "y1"])
        .unwrap();
    // yen has no minor unit
    wtr.write_record(["pay", "yen-bank", "taro", "0.5", "JPY", "y2"])
        .unwrap();
    wtr.write_record(["external", "bank", "", "", "USD", ""])
        .unwrap();
    wtr.write_record(["open", "penny", "", "", "USD", ""]).unwrap();
    wtr.write_record(["pay", "bank", "penny", "0.01", "USD", "c1"])
        .unwrap();
    wtr.write_record(["pay", "bank", "penny", "0.01", "USD", "c2"])
        .unwrap();
    wtr.flush().unwrap();
    drop(wtr);

    let mut cmd = Command::new(cargo_bin!("creoledger"));
    cmd.arg(batch.path()).arg("--currencies").arg("USD,JPY");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("taro,JPY,internal,active,5000,"))
        .stdout(predicate::str::contains("penny,USD,internal,active,0.02,"));
}

#[test]
fn test_unconfigured_currency_is_rejected() {
    let batch = tempfile::NamedTempFile::new().unwrap();
    let mut wtr = csv::Writer::from_path(batch.path()).unwrap();
    wtr.write_record(["type", "account", "counterparty", "amount", "currency", "key"])
        .unwrap();
    wtr.write_record(["open", "taro", "", "", "JPY", ""]).unwrap();
    wtr.write_record(["open", "alice", "", "", "USD", ""]).unwrap();
    wtr.flush().unwrap();
    drop(wtr);

    let mut cmd = Command::new(cargo_bin!("creoledger"));
    cmd.arg(batch.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Unsupported currency: JPY"))
        .stdout(predicate::str::contains("alice,USD,internal,active,0.00,0"))
        .stdout(predicate::str::contains("taro").not());
}
