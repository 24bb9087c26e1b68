// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! D-Bus object mirroring the HTTP operation set.
//!
//! Every method takes a transaction string and a background flag and
//! returns the JSON envelope as a string. Mutations consult polkit with
//! the caller's unique bus name before running.

use std::collections::HashMap;

use log::debug;
use zbus::message::Header;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::Value;

use crate::actions::{Actions, Error as ActionError, ListParams};
use crate::context::Context;
use crate::environment;
use crate::image::ImageConfig;
use crate::response::{render_json, Response};

/// Allow polkit to raise an interactive authentication dialog
const ALLOW_USER_INTERACTION: u32 = 1;

#[zbus::proxy(
    interface = "org.freedesktop.PolicyKit1.Authority",
    default_service = "org.freedesktop.PolicyKit1",
    default_path = "/org/freedesktop/PolicyKit1/Authority"
)]
trait Authority {
    #[allow(clippy::type_complexity)]
    fn check_authorization(
        &self,
        subject: &(&str, HashMap<&str, Value<'_>>),
        action_id: &str,
        details: HashMap<&str, &str>,
        flags: u32,
        cancellation_id: &str,
    ) -> zbus::Result<(bool, bool, HashMap<String, String>)>;
}

pub struct ApmObject {
    actions: Actions,
}

impl ApmObject {
    pub fn new(actions: Actions) -> Self {
        Self { actions }
    }

    /// Ask the policy oracle whether the caller may manage packages
    async fn check_manage(
        &self,
        connection: &zbus::Connection,
        header: &Header<'_>,
    ) -> zbus::fdo::Result<()> {
        let caller = header
            .sender()
            .ok_or_else(|| zbus::fdo::Error::AccessDenied("unknown caller".into()))?
            .to_string();

        let authority = AuthorityProxy::new(connection)
            .await
            .map_err(|err| zbus::fdo::Error::AccessDenied(err.to_string()))?;

        let subject = (
            "system-bus-name",
            HashMap::from([("name", Value::from(caller.as_str()))]),
        );
        let (authorized, _challenge, _details) = authority
            .check_authorization(
                &subject,
                environment::POLKIT_ACTION,
                HashMap::new(),
                ALLOW_USER_INTERACTION,
                "",
            )
            .await
            .map_err(|err| zbus::fdo::Error::AccessDenied(err.to_string()))?;

        if !authorized {
            debug!("polkit denied {caller} for {}", environment::POLKIT_ACTION);
            return Err(zbus::fdo::Error::AccessDenied(format!(
                "not authorized for {}",
                environment::POLKIT_ACTION,
            )));
        }

        Ok(())
    }
}

fn context(transaction: String, background: bool) -> Context {
    Context::service(
        (!transaction.is_empty()).then_some(transaction),
        background,
        true,
    )
}

/// Envelope → wire string; dispatcher errors become failed method calls
fn reply(result: Result<Response, ActionError>) -> zbus::fdo::Result<String> {
    match result {
        Ok(response) => Ok(render_json(&response)),
        Err(err) => Err(zbus::fdo::Error::Failed(err.to_string())),
    }
}

#[zbus::interface(name = "org.altlinux.APM")]
impl ApmObject {
    async fn install(
        &self,
        #[zbus(connection)] connection: &zbus::Connection,
        #[zbus(header)] header: Header<'_>,
        packages: Vec<String>,
        transaction: String,
        background: bool,
    ) -> zbus::fdo::Result<String> {
        self.check_manage(connection, &header).await?;
        reply(self.actions.install(context(transaction, background), packages).await)
    }

    #[allow(clippy::too_many_arguments)]
    async fn remove(
        &self,
        #[zbus(connection)] connection: &zbus::Connection,
        #[zbus(header)] header: Header<'_>,
        packages: Vec<String>,
        purge: bool,
        depends: bool,
        transaction: String,
        background: bool,
    ) -> zbus::fdo::Result<String> {
        self.check_manage(connection, &header).await?;
        reply(
            self.actions
                .remove(context(transaction, background), packages, purge, depends)
                .await,
        )
    }

    async fn reinstall(
        &self,
        #[zbus(connection)] connection: &zbus::Connection,
        #[zbus(header)] header: Header<'_>,
        packages: Vec<String>,
        transaction: String,
        background: bool,
    ) -> zbus::fdo::Result<String> {
        self.check_manage(connection, &header).await?;
        reply(
            self.actions
                .reinstall(context(transaction, background), packages)
                .await,
        )
    }

    async fn update(
        &self,
        #[zbus(connection)] connection: &zbus::Connection,
        #[zbus(header)] header: Header<'_>,
        transaction: String,
        background: bool,
    ) -> zbus::fdo::Result<String> {
        self.check_manage(connection, &header).await?;
        reply(self.actions.update(context(transaction, background)).await)
    }

    async fn upgrade(
        &self,
        #[zbus(connection)] connection: &zbus::Connection,
        #[zbus(header)] header: Header<'_>,
        transaction: String,
        background: bool,
    ) -> zbus::fdo::Result<String> {
        self.check_manage(connection, &header).await?;
        reply(self.actions.upgrade(context(transaction, background)).await)
    }

    async fn info(&self, name: String, full: bool, transaction: String) -> zbus::fdo::Result<String> {
        reply(self.actions.info(context(transaction, false), name, full).await)
    }

    #[allow(clippy::too_many_arguments)]
    async fn list(
        &self,
        filters: Vec<String>,
        sort: String,
        order: String,
        limit: u32,
        offset: u32,
        transaction: String,
    ) -> zbus::fdo::Result<String> {
        let params = ListParams {
            filters,
            sort: (!sort.is_empty()).then_some(sort),
            order: (!order.is_empty()).then_some(order),
            limit: (limit > 0).then_some(limit),
            offset: (offset > 0).then_some(offset),
            force_update: false,
        };
        reply(self.actions.list(context(transaction, false), params).await)
    }

    async fn search(
        &self,
        query: String,
        installed: bool,
        transaction: String,
    ) -> zbus::fdo::Result<String> {
        reply(
            self.actions
                .search(context(transaction, false), query, installed)
                .await,
        )
    }

    async fn get_filter_fields(&self) -> String {
        render_json(&self.actions.get_filter_fields())
    }

    async fn check_install(
        &self,
        packages: Vec<String>,
        transaction: String,
    ) -> zbus::fdo::Result<String> {
        reply(
            self.actions
                .check_install(context(transaction, false), packages)
                .await,
        )
    }

    async fn check_remove(
        &self,
        packages: Vec<String>,
        transaction: String,
    ) -> zbus::fdo::Result<String> {
        reply(
            self.actions
                .check_remove(context(transaction, false), packages)
                .await,
        )
    }

    async fn check_reinstall(
        &self,
        packages: Vec<String>,
        transaction: String,
    ) -> zbus::fdo::Result<String> {
        reply(
            self.actions
                .check_reinstall(context(transaction, false), packages)
                .await,
        )
    }

    async fn check_upgrade(&self, transaction: String) -> zbus::fdo::Result<String> {
        reply(self.actions.check_upgrade(context(transaction, false)).await)
    }

    async fn image_apply(
        &self,
        #[zbus(connection)] connection: &zbus::Connection,
        #[zbus(header)] header: Header<'_>,
        transaction: String,
        background: bool,
    ) -> zbus::fdo::Result<String> {
        self.check_manage(connection, &header).await?;
        reply(self.actions.image_apply(context(transaction, background)).await)
    }

    async fn image_update(
        &self,
        #[zbus(connection)] connection: &zbus::Connection,
        #[zbus(header)] header: Header<'_>,
        transaction: String,
        background: bool,
    ) -> zbus::fdo::Result<String> {
        self.check_manage(connection, &header).await?;
        reply(self.actions.image_update(context(transaction, background)).await)
    }

    async fn image_status(&self, transaction: String) -> zbus::fdo::Result<String> {
        reply(self.actions.image_status(context(transaction, false)).await)
    }

    async fn image_history(
        &self,
        name: String,
        limit: u32,
        offset: u32,
        transaction: String,
    ) -> zbus::fdo::Result<String> {
        reply(
            self.actions
                .image_history(
                    context(transaction, false),
                    (!name.is_empty()).then_some(name),
                    (limit > 0).then_some(limit),
                    (offset > 0).then_some(offset),
                )
                .await,
        )
    }

    async fn image_get_config(&self, transaction: String) -> zbus::fdo::Result<String> {
        reply(self.actions.image_get_config(context(transaction, false)).await)
    }

    async fn image_save_config(
        &self,
        #[zbus(connection)] connection: &zbus::Connection,
        #[zbus(header)] header: Header<'_>,
        config: String,
        transaction: String,
    ) -> zbus::fdo::Result<String> {
        self.check_manage(connection, &header).await?;

        let config: ImageConfig = serde_json::from_str(&config)
            .map_err(|err| zbus::fdo::Error::InvalidArgs(err.to_string()))?;
        reply(
            self.actions
                .image_save_config(context(transaction, false), config)
                .await,
        )
    }

    /// Event plane fan-out, JSON payload
    #[zbus(signal)]
    pub async fn notification(emitter: &SignalEmitter<'_>, payload: String) -> zbus::Result<()>;
}

/// Export the object on the system bus and wire the signal sink
pub async fn serve(actions: Actions) -> Result<zbus::Connection, zbus::Error> {
    let connection = zbus::connection::Builder::system()?
        .name(environment::BUS_NAME)?
        .serve_at(environment::BUS_PATH, ApmObject::new(actions.clone()))?
        .build()
        .await?;

    actions.events().attach_dbus(connection.clone());

    Ok(connection)
}
