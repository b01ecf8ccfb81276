//! Sibling service resolution.
//!
//! A key-input record only names one service. The Generic Access and Device
//! Information services of the same peripheral are found by re-enumerating
//! with the record's container id added to the selector.

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::backend::GattBackend;
use crate::ble::device::{DeviceRecord, DeviceSelector, GattService};
use crate::ble::uuids::CONTAINER_ID_PROPERTY;
use crate::error::{Error, Result};
use crate::utils::cancellable;

/// Open the `target` service living on the same physical device as `anchor`.
///
/// Exactly one match is required: zero matches is
/// [`Error::NoSiblingFound`], more than one is [`Error::AmbiguousSibling`].
/// Any failure from the open call other than cancellation is reported as
/// [`Error::ServiceOpenFailed`].
pub async fn find_sibling_service(
    backend: &dyn GattBackend,
    anchor: &DeviceRecord,
    target: Uuid,
    token: &CancellationToken,
) -> Result<GattService> {
    let container_id = anchor
        .container_id()
        .ok_or_else(|| Error::MissingCorrelationProperty {
            property: CONTAINER_ID_PROPERTY.to_string(),
        })?;

    let selector = DeviceSelector::for_service(target).with_container(container_id);
    trace!("Resolving sibling with selector {}", selector);

    let mut matches = cancellable(token, backend.enumerate_devices(&selector)).await?;

    let record = match matches.len() {
        0 => {
            return Err(Error::NoSiblingFound {
                service_uuid: target.to_string(),
                container_id: container_id.to_string(),
            })
        }
        1 => matches.remove(0),
        count => {
            return Err(Error::AmbiguousSibling {
                service_uuid: target.to_string(),
                container_id: container_id.to_string(),
                count,
            })
        }
    };

    debug!(
        "Sibling {} of {} resolved to {}",
        target, anchor.id, record.id
    );

    open_service(backend, &record.id, token).await
}

/// Open a service by id, folding backend failures into [`Error::ServiceOpenFailed`].
pub async fn open_service(
    backend: &dyn GattBackend,
    service_id: &str,
    token: &CancellationToken,
) -> Result<GattService> {
    match cancellable(token, backend.open_service(service_id)).await {
        Ok(service) => Ok(service),
        Err(e @ (Error::Cancelled | Error::ServiceOpenFailed { .. })) => Err(e),
        Err(e) => Err(Error::ServiceOpenFailed {
            service_id: service_id.to_string(),
            reason: e.to_string(),
        }),
    }
}
