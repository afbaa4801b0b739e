use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};

use super::*;
use crate::test_support::fake_devtools;

async fn page_with<F>(reply: F) -> CdpPage
where
	F: Fn(&str, &Value) -> Value + Send + 'static,
{
	let url = fake_devtools(move |req| {
		assert_eq!(req.session_id.as_deref(), Some("S1"));
		Some(json!({ "id": req.id, "result": reply(&req.method, &req.params) }))
	})
	.await;
	let conn = CdpConnection::connect(&url, Duration::from_secs(2)).await.unwrap();
	CdpPage::new(conn, "S1".into(), "T1".into())
}

fn value(v: Value) -> Value {
	json!({ "result": { "type": "object", "value": v } })
}

#[tokio::test]
async fn evaluate_returns_by_value() {
	let page = page_with(|method, params| {
		assert_eq!(method, "Runtime.evaluate");
		assert_eq!(params["returnByValue"], true);
		value(json!("https://portal.example/"))
	})
	.await;

	assert_eq!(page.url().await.unwrap(), "https://portal.example/");
}

#[tokio::test]
async fn evaluate_exception_becomes_error() {
	let page = page_with(|_, _| {
		json!({
			"result": { "type": "object", "subtype": "error" },
			"exceptionDetails": { "text": "Uncaught", "exception": { "description": "TypeError: x is null" } }
		})
	})
	.await;

	let err = page.evaluate("x.y").await.unwrap_err();
	assert!(matches!(&err, Error::Evaluation(m) if m.contains("TypeError")), "got {err:?}");
}

#[tokio::test]
async fn goto_surfaces_navigation_error_text() {
	let page = page_with(|method, _| {
		assert_eq!(method, "Page.navigate");
		json!({ "frameId": "F", "errorText": "net::ERR_NAME_NOT_RESOLVED" })
	})
	.await;

	let err = page.goto("https://nowhere.invalid/", Duration::from_secs(1)).await.unwrap_err();
	assert!(matches!(err, Error::NavigationFailed { .. }), "got {err:?}");
}

#[tokio::test]
async fn goto_waits_for_ready_state() {
	let page = page_with(|method, _| match method {
		"Page.navigate" => json!({ "frameId": "F" }),
		_ => value(json!(true)),
	})
	.await;

	page.goto("https://portal.example/login", Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn wait_for_times_out_when_never_visible() {
	let page = page_with(|_, _| value(json!(false))).await;

	let err = page.wait_for("#missing", Duration::from_millis(250)).await.unwrap_err();
	match err {
		Error::Timeout { condition, .. } => assert!(condition.contains("#missing")),
		other => panic!("expected timeout, got {other:?}"),
	}
}

#[tokio::test]
async fn click_dispatches_mouse_sequence_at_centre() {
	let calls = Arc::new(Mutex::new(Vec::new()));
	let recorded = Arc::clone(&calls);
	let page = page_with(move |method, params| {
		recorded.lock().push((method.to_string(), params.clone()));
		match method {
			"Runtime.evaluate" if params["expression"].as_str().unwrap_or("").contains("scrollIntoView") => {
				value(json!({ "x": 40.0, "y": 12.5 }))
			}
			"Runtime.evaluate" => value(json!(true)),
			_ => json!({}),
		}
	})
	.await;

	page.click("button:has-text(\"Continue\")", Duration::from_secs(1)).await.unwrap();

	let calls = calls.lock();
	let mouse: Vec<_> = calls.iter().filter(|(m, _)| m == "Input.dispatchMouseEvent").collect();
	assert_eq!(mouse.len(), 3);
	assert_eq!(mouse[1].1["type"], "mousePressed");
	assert_eq!(mouse[1].1["x"], 40.0);
	assert_eq!(mouse[2].1["type"], "mouseReleased");
}

#[tokio::test]
async fn click_on_missing_element_is_not_found() {
	let page = page_with(|_, params| {
		if params["expression"].as_str().unwrap_or("").contains("scrollIntoView") {
			value(Value::Null)
		} else {
			value(json!(true))
		}
	})
	.await;

	let err = page.click("#gone", Duration::from_secs(1)).await.unwrap_err();
	assert!(matches!(err, Error::ElementNotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn fill_inserts_text_after_focus() {
	let calls = Arc::new(Mutex::new(Vec::new()));
	let recorded = Arc::clone(&calls);
	let page = page_with(move |method, params| {
		recorded.lock().push((method.to_string(), params.clone()));
		match method {
			"Runtime.evaluate" => value(json!(true)),
			_ => json!({}),
		}
	})
	.await;

	page.fill(r"#login-form\.password", "s3cret", Duration::from_secs(1)).await.unwrap();

	let calls = calls.lock();
	let insert = calls.iter().find(|(m, _)| m == "Input.insertText").unwrap();
	assert_eq!(insert.1["text"], "s3cret");
}

#[tokio::test]
async fn text_trims_and_maps_missing_to_none() {
	let page = page_with(|_, params| {
		if params["expression"].as_str().unwrap_or("").contains("SummaryBalance") {
			value(json!("  $1,234.56 \n"))
		} else {
			value(Value::Null)
		}
	})
	.await;

	assert_eq!(page.text(r#"p[class*="SummaryBalance"]"#).await.unwrap().as_deref(), Some("$1,234.56"));
	assert_eq!(page.text("h1").await.unwrap(), None);
}

#[tokio::test]
async fn invalid_selector_fails_before_any_call() {
	let page = page_with(|_, _| panic!("no call expected")).await;
	let err = page.is_visible("a:has-text(").await.unwrap_err();
	assert!(matches!(err, Error::InvalidSelector { .. }), "got {err:?}");
}

#[tokio::test]
async fn close_targets_the_browser_session() {
	let url = fake_devtools(|req| {
		assert_eq!(req.method, "Target.closeTarget");
		assert!(req.session_id.is_none());
		assert_eq!(req.params["targetId"], "T1");
		if req.id == 1 {
			Some(json!({ "id": req.id, "result": { "success": true } }))
		} else {
			Some(json!({ "id": req.id, "error": { "code": -32602, "message": "No target with given id found" } }))
		}
	})
	.await;
	let conn = CdpConnection::connect(&url, Duration::from_secs(2)).await.unwrap();
	let page = CdpPage::new(conn, "S1".into(), "T1".into());

	page.close().await.unwrap();
	// Second close hits an unknown target and is still fine.
	page.close().await.unwrap();
}
