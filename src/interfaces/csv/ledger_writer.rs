use crate::domain::account::TechnicianAccount;
use crate::domain::booking::Booking;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct BookingRow {
    booking: String,
    customer: String,
    status: &'static str,
    initial_payment: &'static str,
    final_payment: &'static str,
    initial_amount: String,
    service_amount: String,
    fine_applied: bool,
    refund_status: &'static str,
    refund_id: String,
}

impl From<&Booking> for BookingRow {
    fn from(b: &Booking) -> Self {
        Self {
            booking: b.id.to_string(),
            customer: b.customer_id.to_string(),
            status: b.status.as_str(),
            initial_payment: b.initial_payment_status.as_str(),
            final_payment: b.payment_status.as_str(),
            initial_amount: b.initial_amount.to_string(),
            service_amount: b.service_amount.map(|a| a.to_string()).unwrap_or_default(),
            fine_applied: b.fine_applied,
            refund_status: b.refund.status.as_str(),
            refund_id: b.refund.refund_id.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AccountRow {
    account: String,
    applicant: String,
    payment_status: &'static str,
    is_active: bool,
    pay_rate: String,
}

impl From<&TechnicianAccount> for AccountRow {
    fn from(a: &TechnicianAccount) -> Self {
        Self {
            account: a.id.to_string(),
            applicant: a.applicant.clone(),
            payment_status: a.payment_status.as_str(),
            is_active: a.is_active,
            pay_rate: a.pay_rate.to_string(),
        }
    }
}

/// Writes the final ledger state as two CSV tables, bookings then accounts,
/// separated by a blank line. Each table carries its own header.
pub struct LedgerWriter<W: Write> {
    inner: W,
}

impl<W: Write> LedgerWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_ledger(
        &mut self,
        bookings: &[Booking],
        accounts: &[TechnicianAccount],
    ) -> Result<()> {
        self.write_table(
            &[
                "booking",
                "customer",
                "status",
                "initial_payment",
                "final_payment",
                "initial_amount",
                "service_amount",
                "fine_applied",
                "refund_status",
                "refund_id",
            ],
            bookings.iter().map(BookingRow::from),
        )?;
        writeln!(self.inner)?;
        self.write_table(
            &["account", "applicant", "payment_status", "is_active", "pay_rate"],
            accounts.iter().map(AccountRow::from),
        )
    }

    // Headers are written explicitly so an empty table still has one.
    fn write_table<T: Serialize>(
        &mut self,
        header: &[&str],
        rows: impl Iterator<Item = T>,
    ) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut self.inner);
        writer.write_record(header)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}
