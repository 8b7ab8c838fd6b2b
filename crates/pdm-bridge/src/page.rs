//! In-page shim (spec §4.9): the only code in this crate compiled for
//! `wasm32-unknown-unknown`. Mirrors `massalabs-gossip`'s `wasm-main`
//! layout — a `#[wasm_bindgen(start)]` panic hook install, typed wrapper
//! structs sitting over a single plain-JSON call path.

use js_sys::{Object, Promise, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::future_to_promise;
use web_sys::MessageEvent;

use crate::is_file_scheme_origin;

const REQUEST_TIMEOUT_MS: u32 = 30_000;
const MESSAGE_TYPE_REQUEST: &str = "request";
const SOURCE_WINDOW: &str = "window";

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
}

/// Mints a correlation id, posts a `{source, origin, type, id, action,
/// data}` envelope to the page's own window, and races a one-shot
/// `message` listener against a 30s timeout. The origin check on the
/// response is relaxed only for the file-scheme case (spec §4.9).
async fn call(action: &str, data: JsValue) -> Result<JsValue, JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window in this context"))?;
    let page_origin = window.location().origin().unwrap_or_default();
    let target_origin = if is_file_scheme_origin(&page_origin) { "*".to_string() } else { page_origin.clone() };
    let file_scheme = is_file_scheme_origin(&page_origin);

    let correlation_id = uuid::Uuid::new_v4().to_string();

    let envelope = Object::new();
    Reflect::set(&envelope, &"source".into(), &SOURCE_WINDOW.into())?;
    Reflect::set(&envelope, &"origin".into(), &page_origin.clone().into())?;
    Reflect::set(&envelope, &"type".into(), &MESSAGE_TYPE_REQUEST.into())?;
    Reflect::set(&envelope, &"id".into(), &correlation_id.clone().into())?;
    Reflect::set(&envelope, &"action".into(), &action.into())?;
    Reflect::set(&envelope, &"data".into(), &data)?;

    let (tx, rx) = futures::channel::oneshot::channel::<JsValue>();
    let tx = std::rc::Rc::new(std::cell::RefCell::new(Some(tx)));

    let expected_id = correlation_id;
    let tx_cb = tx.clone();
    let listener = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
        if !file_scheme && event.origin() != page_origin {
            return;
        }
        let Ok(response_id) = Reflect::get(&event.data(), &"id".into()) else { return };
        if response_id.as_string().as_deref() != Some(expected_id.as_str()) {
            return;
        }
        if let Some(tx) = tx_cb.borrow_mut().take() {
            let _ = tx.send(event.data());
        }
    });
    window.add_event_listener_with_callback("message", listener.as_ref().unchecked_ref())?;
    window.post_message(&envelope, &target_origin)?;

    let timeout = gloo_timers::future::TimeoutFuture::new(REQUEST_TIMEOUT_MS);
    let outcome = futures::future::select(rx, timeout).await;

    window.remove_event_listener_with_callback("message", listener.as_ref().unchecked_ref())?;
    drop(listener);

    match outcome {
        futures::future::Either::Left((Ok(response), _)) => extract_payload(response),
        futures::future::Either::Left((Err(_canceled), _)) | futures::future::Either::Right(_) => {
            Err(JsValue::from_str("PDM request timeout"))
        }
    }
}

/// Splits the `{id, data?, error?, ts}` response envelope into a
/// resolved value or a rejection, exactly as the source's promise-based
/// capability surface does.
fn extract_payload(response: JsValue) -> Result<JsValue, JsValue> {
    let error = Reflect::get(&response, &"error".into())?;
    if !error.is_undefined() && !error.is_null() {
        return Err(error);
    }
    Reflect::get(&response, &"data".into())
}

fn string_field(key: &str, value: String) -> Result<(JsValue, JsValue), JsValue> {
    Ok((key.into(), value.into()))
}

/// The fixed capability surface a web page may call (spec §4.9): ping,
/// connect, disconnect, unlock/lock/is-unlocked, get-identity,
/// store/retrieve/delete, grant/revoke/list, get-user-data.
#[wasm_bindgen]
pub struct PdmBridge;

#[wasm_bindgen]
impl PdmBridge {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        PdmBridge
    }

    pub fn ping(&self) -> Promise {
        future_to_promise(async move { call("ping", JsValue::NULL).await })
    }

    pub fn connect(&self, requested_actions: Vec<String>) -> Promise {
        future_to_promise(async move {
            let data = Object::new();
            let actions = js_sys::Array::new();
            for action in requested_actions {
                actions.push(&JsValue::from_str(&action));
            }
            Reflect::set(&data, &"requestedActions".into(), &actions)?;
            call("connect", data.into()).await
        })
    }

    pub fn disconnect(&self) -> Promise {
        future_to_promise(async move { call("disconnect", JsValue::NULL).await })
    }

    pub fn unlock(&self, password: String) -> Promise {
        future_to_promise(async move {
            let data = Object::new();
            let (k, v) = string_field("password", password)?;
            Reflect::set(&data, &k, &v)?;
            call("unlock", data.into()).await
        })
    }

    pub fn lock(&self) -> Promise {
        future_to_promise(async move { call("lock", JsValue::NULL).await })
    }

    pub fn is_unlocked(&self) -> Promise {
        future_to_promise(async move { call("is_unlocked", JsValue::NULL).await })
    }

    pub fn get_identity(&self) -> Promise {
        future_to_promise(async move { call("get_identity", JsValue::NULL).await })
    }

    pub fn store_data(&self, data: JsValue, collection_id: String) -> Promise {
        future_to_promise(async move {
            let payload = Object::new();
            Reflect::set(&payload, &"data".into(), &data)?;
            let metadata = Object::new();
            let (k, v) = string_field("collectionId", collection_id)?;
            Reflect::set(&metadata, &k, &v)?;
            Reflect::set(&payload, &"metadata".into(), &metadata)?;
            call("store_data", payload.into()).await
        })
    }

    pub fn retrieve_data(&self, document_id: String, collection_id: String) -> Promise {
        future_to_promise(async move {
            let payload = Object::new();
            let (k, v) = string_field("documentId", document_id)?;
            Reflect::set(&payload, &k, &v)?;
            let (k, v) = string_field("collectionId", collection_id)?;
            Reflect::set(&payload, &k, &v)?;
            call("retrieve_data", payload.into()).await
        })
    }

    pub fn delete_data(&self, document_id: String, collection_id: String) -> Promise {
        future_to_promise(async move {
            let payload = Object::new();
            let (k, v) = string_field("documentId", document_id)?;
            Reflect::set(&payload, &k, &v)?;
            let (k, v) = string_field("collectionId", collection_id)?;
            Reflect::set(&payload, &k, &v)?;
            call("delete_data", payload.into()).await
        })
    }

    pub fn get_user_data(&self) -> Promise {
        future_to_promise(async move { call("get_user_data", JsValue::NULL).await })
    }

    pub fn grant_permission(&self, data_id: String, collection_id: String, app_did: String, permissions: Vec<String>) -> Promise {
        future_to_promise(async move {
            let payload = Object::new();
            let (k, v) = string_field("dataId", data_id)?;
            Reflect::set(&payload, &k, &v)?;
            let (k, v) = string_field("collectionId", collection_id)?;
            Reflect::set(&payload, &k, &v)?;
            let (k, v) = string_field("appDid", app_did)?;
            Reflect::set(&payload, &k, &v)?;
            let permissions_array = js_sys::Array::new();
            for permission in permissions {
                permissions_array.push(&JsValue::from_str(&permission));
            }
            Reflect::set(&payload, &"permissions".into(), &permissions_array)?;
            call("grant_permission", payload.into()).await
        })
    }

    pub fn revoke_permission(
        &self,
        data_id: String,
        collection_id: String,
        app_did: String,
        permission_id: Option<String>,
    ) -> Promise {
        future_to_promise(async move {
            let payload = Object::new();
            let (k, v) = string_field("dataId", data_id)?;
            Reflect::set(&payload, &k, &v)?;
            let (k, v) = string_field("collectionId", collection_id)?;
            Reflect::set(&payload, &k, &v)?;
            let (k, v) = string_field("appDid", app_did)?;
            Reflect::set(&payload, &k, &v)?;
            if let Some(permission_id) = permission_id {
                let (k, v) = string_field("permissionId", permission_id)?;
                Reflect::set(&payload, &k, &v)?;
            }
            call("revoke_permission", payload.into()).await
        })
    }

    pub fn list_permissions(&self) -> Promise {
        future_to_promise(async move { call("list_permissions", JsValue::NULL).await })
    }
}

impl Default for PdmBridge {
    fn default() -> Self {
        Self::new()
    }
}
