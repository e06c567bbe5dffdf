//! Request dispatch: wire requests in, wire responses out.
//!
//! Every request gets exactly one response correlated by the caller's
//! request id — success with a result payload, or a taxonomy error. The
//! hello handshake is handled by the connection loop before anything
//! reaches here.

use metrics::counter;
use serde_json::{Value, json};
use tracing::{debug, warn};

use fdc3_broker::Broker;
use fdc3_core::errors::{Fdc3Error, Result};
use fdc3_core::ids::InstanceId;
use fdc3_core::protocol::{ClientRequest, WireError, WireRequest, WireResponse};

use crate::metrics::{REQUEST_ERRORS_TOTAL, REQUESTS_TOTAL};

/// Handle one client request against the instance's session broker.
pub async fn dispatch(broker: &Broker, instance: &InstanceId, request: WireRequest) -> WireResponse {
    let request_type = request_type(&request.body);
    counter!(REQUESTS_TOTAL, "type" => request_type).increment(1);
    debug!(instance = %instance, request_type, request_id = %request.request_id, "dispatching request");

    let result = handle(broker, instance, request.body).await;
    match result {
        Ok(value) => WireResponse {
            request_id: request.request_id,
            result: Some(value),
            error: None,
        },
        Err(e) => {
            warn!(instance = %instance, request_type, error = %e, "request failed");
            counter!(REQUEST_ERRORS_TOTAL, "type" => request_type, "code" => e.code())
                .increment(1);
            WireResponse {
                request_id: request.request_id,
                result: None,
                error: Some(WireError::from(&e)),
            }
        }
    }
}

async fn handle(broker: &Broker, instance: &InstanceId, body: ClientRequest) -> Result<Value> {
    match body {
        // A second hello on an established connection is a protocol error.
        ClientRequest::Hello { .. } => Err(Fdc3Error::InvalidInstance(format!(
            "{instance} already completed its handshake"
        ))),

        ClientRequest::Broadcast { channel_id, context } => {
            broker.broadcast(instance, channel_id, context)?;
            Ok(Value::Null)
        }

        ClientRequest::RaiseIntent { intent, context, target } => {
            let resolution = broker.raise_intent(instance, &intent, context, target).await?;
            Ok(serde_json::to_value(resolution).unwrap_or(Value::Null))
        }

        ClientRequest::AddContextListener { context_type, channel_id } => {
            let listener_id = broker.add_context_listener(instance, context_type, channel_id)?;
            Ok(json!({ "listenerId": listener_id }))
        }

        ClientRequest::AddIntentListener { intent } => {
            let listener_id = broker.add_intent_listener(instance, &intent)?;
            Ok(json!({ "listenerId": listener_id }))
        }

        ClientRequest::DropListener { listener_id } => {
            let dropped = broker.drop_listener(&listener_id);
            Ok(json!({ "dropped": dropped }))
        }

        ClientRequest::GetCurrentContext { channel_id, context_type } => {
            let context = broker.get_current_context(&channel_id, context_type.as_deref());
            Ok(context.map_or(Value::Null, |c| {
                serde_json::to_value(c).unwrap_or(Value::Null)
            }))
        }

        ClientRequest::JoinUserChannel { channel_id } => {
            broker.join_user_channel(instance, channel_id)?;
            Ok(Value::Null)
        }

        ClientRequest::GetOrCreateChannel { channel_id } => {
            let info = broker.get_or_create_channel(instance, &channel_id)?;
            Ok(serde_json::to_value(info).unwrap_or(Value::Null))
        }

        ClientRequest::FindIntent { intent, context_type } => {
            let list = broker.find_intent(&intent, context_type.as_deref()).await;
            Ok(serde_json::to_value(list).unwrap_or(Value::Null))
        }

        ClientRequest::FindIntentsByContext { context_type } => {
            let lists = broker.find_intents_by_context(&context_type).await;
            Ok(serde_json::to_value(lists).unwrap_or(Value::Null))
        }

        ClientRequest::Open { app_id, context } => {
            let opened = broker.open(instance, &app_id, context).await?;
            Ok(json!({ "instanceId": opened }))
        }

        ClientRequest::IntentResult { request_id, result_id } => {
            let _ = broker.intent_result(instance, &request_id, result_id);
            Ok(Value::Null)
        }
    }
}

fn request_type(body: &ClientRequest) -> &'static str {
    match body {
        ClientRequest::Hello { .. } => "hello",
        ClientRequest::Broadcast { .. } => "broadcastRequest",
        ClientRequest::RaiseIntent { .. } => "raiseIntentRequest",
        ClientRequest::AddContextListener { .. } => "addContextListenerRequest",
        ClientRequest::AddIntentListener { .. } => "addIntentListenerRequest",
        ClientRequest::DropListener { .. } => "dropListenerRequest",
        ClientRequest::GetCurrentContext { .. } => "getCurrentContextRequest",
        ClientRequest::JoinUserChannel { .. } => "joinUserChannelRequest",
        ClientRequest::GetOrCreateChannel { .. } => "getOrCreateChannelRequest",
        ClientRequest::FindIntent { .. } => "findIntentRequest",
        ClientRequest::FindIntentsByContext { .. } => "findIntentsByContextRequest",
        ClientRequest::Open { .. } => "openRequest",
        ClientRequest::IntentResult { .. } => "intentResultRequest",
    }
}
