use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use bulk_hooks::{
    BoxError, Condition, HookContext, HookError, HookModel, HookRegistry, HookSet,
    HookedRepository, InMemoryModelStore,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, HookModel)]
#[hook_model(collection = "accounts")]
pub struct Account {
    pub id: String,
    pub name: String,
    pub balance: i64,
    pub status: Option<Status>,
    pub tag: String,
}

impl Account {
    pub fn new(id: &str, name: &str, balance: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            balance,
            status: None,
            tag: String::new(),
        }
    }

    pub fn with_status(mut self, name: &str) -> Self {
        self.status = Some(Status { name: name.into() });
        self
    }
}

/// Handler set covering every phase; side effects go to `log` so tests can
/// assert invocation order and pairing.
pub struct AccountHooks {
    pub log: Arc<Mutex<Vec<String>>>,
}

impl AccountHooks {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn reject_negative(
        &self,
        new: &mut [Account],
        _old: &[Option<Account>],
        _ctx: &HookContext,
    ) -> Result<(), BoxError> {
        for account in new.iter() {
            if account.balance < 0 {
                return Err(Box::new(HookError::validation(format!(
                    "negative balance for {}",
                    account.name
                ))));
            }
        }
        Ok(())
    }

    /// One method handling two events: stamps how the record last changed.
    pub fn stamp_tag(
        &self,
        new: &mut [Account],
        _old: &[Option<Account>],
        ctx: &HookContext,
    ) -> Result<(), BoxError> {
        let tag = if ctx.is_create() { "created" } else { "updated" };
        for account in new.iter_mut() {
            account.tag = tag.into();
        }
        Ok(())
    }

    pub fn on_activated(
        &self,
        new: &mut [Account],
        _old: &[Option<Account>],
        _ctx: &HookContext,
    ) -> Result<(), BoxError> {
        let mut log = self.log.lock().unwrap();
        for account in new.iter() {
            log.push(format!("activated:{}", account.id));
        }
        Ok(())
    }

    /// AFTER-phase audit trail: records event, id, and the old -> new
    /// balance transition, proving old/new stay parallel.
    pub fn audit(
        &self,
        new: &mut [Account],
        old: &[Option<Account>],
        ctx: &HookContext,
    ) -> Result<(), BoxError> {
        let mut log = self.log.lock().unwrap();
        for (account, old_account) in new.iter().zip(old.iter()) {
            let old_balance = old_account
                .as_ref()
                .map(|o| o.balance.to_string())
                .unwrap_or_else(|| "none".into());
            log.push(format!(
                "{}:{}:{}->{}",
                ctx.event,
                account.id,
                old_balance,
                account.balance
            ));
        }
        Ok(())
    }
}

bulk_hooks::hooks!(AccountHooks for Account {
    ValidateCreate => reject_negative,
    ValidateUpdate(when = Condition::changed("balance")) => reject_negative,
    BeforeCreate(priority = 1) => stamp_tag,
    BeforeUpdate(priority = 1) => stamp_tag,
    BeforeUpdate(priority = 10, when = Condition::changes_to("status.name", "ACTIVE")) => on_activated,
    AfterCreate => audit,
    AfterUpdate => audit,
    AfterDelete => audit,
});

pub type AccountRepo = HookedRepository<InMemoryModelStore, Account>;

/// Fresh store, registry, and wired hook set.
pub fn hooked_repo() -> (AccountRepo, Arc<Mutex<Vec<String>>>) {
    let registry = HookRegistry::new();
    let hooks = Arc::new(AccountHooks::new());
    let log = hooks.log.clone();
    AccountHooks::register_all(hooks, &registry).unwrap();
    (
        HookedRepository::new(InMemoryModelStore::new(), registry),
        log,
    )
}

/// Drain the shared log.
pub fn take_log(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    std::mem::take(&mut *log.lock().unwrap())
}
