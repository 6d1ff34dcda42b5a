//! Transaction guard.

use crate::conversion::ToSqlText;
use crate::error::{Error, Result};
use crate::result::QueryResult;
use crate::session::{Guest, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    Committed,
    Aborted,
    /// The link broke during `COMMIT`.
    InDoubt,
}

/// A `BEGIN`..`COMMIT` block holding the session's transaction slot.
///
/// Dropping an active transaction reports it as a notice and rolls it back.
#[derive(Debug)]
pub struct Transaction<'a> {
    session: &'a mut Session,
    guest: Guest,
    status: Status,
}

impl<'a> Transaction<'a> {
    /// Register an unnamed transaction and send `BEGIN`.
    pub fn begin(session: &'a mut Session) -> Result<Self> {
        Self::named(session, "")
    }

    /// Register a transaction called `name` and send `BEGIN`.
    pub fn named(session: &'a mut Session, name: &str) -> Result<Self> {
        let guest = Guest::new("transaction", name);
        session.register_transaction(&guest)?;
        if let Err(e) = session.exec("BEGIN") {
            session.unregister_transaction(&guest);
            return Err(e);
        }
        Ok(Self {
            session,
            guest,
            status: Status::Active,
        })
    }

    pub fn name(&self) -> &str {
        self.guest.name()
    }

    /// The session, for escaping and connection details.
    pub fn session(&self) -> &Session {
        self.session
    }

    fn check_active(&self) -> Result<()> {
        match self.status {
            Status::Active => Ok(()),
            Status::Committed => Err(Error::Usage(format!(
                "{} was already committed.",
                self.guest.describe()
            ))),
            Status::Aborted => Err(Error::Usage(format!(
                "{} was already aborted.",
                self.guest.describe()
            ))),
            Status::InDoubt => Err(Error::Usage(format!(
                "{} is in an indeterminate state.",
                self.guest.describe()
            ))),
        }
    }

    pub fn exec(&mut self, query: &str) -> Result<QueryResult> {
        self.check_active()?;
        self.session.exec(query)
    }

    /// Run `query` and fail unless it returned exactly `rows` rows.
    pub fn exec_n(&mut self, rows: usize, query: &str) -> Result<QueryResult> {
        let result = self.exec(query)?;
        result.expect_rows(rows)?;
        Ok(result)
    }

    /// Send a notification on `channel` through `pg_notify`, which, unlike
    /// `NOTIFY`, takes its arguments as parameters. Delivery happens when the
    /// transaction commits.
    pub fn notify(&mut self, channel: &str, payload: &str) -> Result<()> {
        self.exec_params("SELECT pg_notify($1, $2)", &[&channel, &payload])?
            .expect_rows(1)?;
        Ok(())
    }

    pub fn exec_params(&mut self, query: &str, params: &[&dyn ToSqlText]) -> Result<QueryResult> {
        self.check_active()?;
        self.session.exec_params(query, params)
    }

    pub fn exec_prepared(&mut self, name: &str, params: &[&dyn ToSqlText]) -> Result<QueryResult> {
        self.check_active()?;
        self.session.exec_prepared(name, params)
    }

    /// Send `COMMIT` and release the slot.
    ///
    /// If the link breaks while the `COMMIT` is in flight there is no telling
    /// whether the server committed; that case fails with [`Error::InDoubt`].
    pub fn commit(mut self) -> Result<()> {
        self.check_active()?;
        if !self.session.is_open() {
            return Err(Error::BrokenConnection(format!(
                "Broken connection to backend; cannot complete {}.",
                self.guest.describe()
            )));
        }
        let committed = self.session.exec("COMMIT");
        self.status = match &committed {
            Ok(_) => Status::Committed,
            Err(e) if !self.session.is_open() || matches!(e, Error::BrokenConnection(_)) => {
                Status::InDoubt
            }
            Err(_) => Status::Aborted,
        };
        self.session.unregister_transaction(&self.guest);
        match committed {
            Ok(_) => Ok(()),
            Err(e) if self.status == Status::InDoubt => Err(Error::InDoubt(format!(
                "Lost connection to the backend while committing {}; there is no way to tell \
                 whether it was committed. {e}",
                self.guest.describe()
            ))),
            Err(e) => Err(e),
        }
    }

    /// Send `ROLLBACK` and release the slot. A failing rollback is reported
    /// as a notice.
    pub fn abort(mut self) -> Result<()> {
        self.check_active()?;
        self.rollback();
        Ok(())
    }

    fn rollback(&mut self) {
        if let Err(e) = self.session.exec("ROLLBACK") {
            self.session.process_notice(&e.to_string());
        }
        self.status = Status::Aborted;
        self.session.unregister_transaction(&self.guest);
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.status == Status::Active {
            self.session.process_notice(&format!(
                "{} was never closed properly!\n",
                self.guest.describe()
            ));
            self.rollback();
        }
    }
}
