//! # Storefront Views
//!
//! Minimal HTML pages for the browser return legs.

use axum::response::Html;
use pay_core::Cart;

fn page(title: &str, icon: &str, content: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body style="font-family: system-ui; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: linear-gradient(135deg, #1a1a2e 0%, #16213e 100%);">
    <div style="background: white; padding: 60px; border-radius: 16px; text-align: center;">
        <div style="font-size: 60px;">{icon}</div>
        <h1>{title}</h1>
        {content}
        <p><a href="/">Back to the shop</a></p>
    </div>
</body>
</html>
"#
    ))
}

/// Escape text interpolated into markup
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn success(cart: &Cart) -> Html<String> {
    page(
        "Payment successful",
        "✅",
        &format!(
            r#"<p>Order <code>{}</code>: {} paid.</p>
        <p style="color: #666;">A receipt has been sent to {}.</p>"#,
            escape(&cart.id),
            cart.amount_display(),
            escape(&cart.email)
        ),
    )
}

pub fn cancel() -> Html<String> {
    page(
        "Payment cancelled",
        "❌",
        r#"<p style="color: #666;">No charges were made.</p>"#,
    )
}

pub fn processing(cart: &Cart) -> Html<String> {
    page(
        "Payment processing",
        "⏳",
        &format!(
            r#"<p>Order <code>{}</code> is waiting for confirmation from the payment provider.</p>
        <p style="color: #666;">You will receive an email once it is confirmed.</p>"#,
            escape(&cart.id)
        ),
    )
}

pub fn not_found() -> Html<String> {
    page(
        "Order not found",
        "🔍",
        r#"<p style="color: #666;">We could not find this order.</p>"#,
    )
}

pub fn cart() -> Html<String> {
    page(
        "Your cart",
        "🛒",
        r#"<p style="color: #666;">This payment method is currently unavailable. Please choose another one.</p>"#,
    )
}
