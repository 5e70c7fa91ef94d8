use serde_json::{Map, Value};
use std::fmt::Write as _;

use crate::models::{Category, ExpenseRecord, Items, NewExpense};
use crate::services::normalize::{as_amount, text, truthy};
use crate::utils::format_money;

/// Renders one record as a plain-text card laid out for its category.
pub fn render_card(record: &ExpenseRecord) -> String {
    let mut out = String::new();
    match &record.expense.category {
        Category::Invoice => invoice_card(&mut out, record),
        Category::Restaurant(_) => restaurant_card(&mut out, record),
        Category::Grocery => grocery_card(&mut out, record),
        Category::Other(_) => generic_card(&mut out, record),
    }
    out
}

/// `total_amount`, or `subtotal + tax_amount` when the total is missing or zero.
pub fn display_total(expense: &NewExpense) -> f64 {
    match expense.total_amount {
        Some(total) if total != 0.0 => total,
        _ => expense.subtotal.unwrap_or(0.0) + expense.tax_amount.unwrap_or(0.0),
    }
}

fn raw(expense: &NewExpense) -> Option<&Map<String, Value>> {
    expense.raw_data.as_object()
}

fn raw_text(expense: &NewExpense, key: &str) -> Option<String> {
    raw(expense).and_then(|obj| text(obj, &[key]))
}

fn raw_amount(expense: &NewExpense, key: &str) -> Option<f64> {
    raw(expense)?.get(key).filter(|v| truthy(v)).and_then(as_amount)
}

fn nonzero(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0)
}

fn header(out: &mut String, record: &ExpenseRecord, vendor: Option<&str>) {
    let expense = &record.expense;
    let title = vendor.unwrap_or("Unknown vendor");
    let _ = writeln!(out, "{}  [{}] [{}]", title, expense.category, expense.status);
    let _ = writeln!(out, "  id: {}", record.id);
}

fn line(out: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "  {:<14}{}", format!("{}:", label), value);
}

fn footer(out: &mut String, expense: &NewExpense) {
    if let Some(tags) = expense.tags.as_deref().filter(|t| !t.is_empty()) {
        line(out, "Tags", tags);
    }
    if let Some(url) = expense.image_url.as_deref().filter(|u| !u.is_empty()) {
        line(out, "Document", url);
    }
}

fn items_text(items: &Items) -> String {
    match items {
        Items::Text(text) => text.clone(),
        Items::List(list) => list
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn write_block(out: &mut String, label: &str, body: &str) {
    let _ = writeln!(out, "  {}:", label);
    for row in body.lines() {
        let _ = writeln!(out, "    {}", row);
    }
}

fn invoice_card(out: &mut String, record: &ExpenseRecord) {
    let expense = &record.expense;
    header(out, record, expense.vendor_name.as_deref());
    if let Some(date) = &expense.date {
        line(out, "Date", date);
    }
    if let Some(due) = &expense.due_date {
        line(out, "Due", due);
    }
    if let Some(items) = expense.items.as_ref().filter(|i| !i.is_empty()) {
        write_block(out, "Items", &items_text(items));
    }
    let currency = &expense.currency;
    line(out, "Subtotal", format_money(currency, expense.subtotal.unwrap_or(0.0)));
    line(out, "Tax", format_money(currency, expense.tax_amount.unwrap_or(0.0)));
    line(out, "Total", format_money(currency, display_total(expense)));
    if let Some(terms) = &expense.payment_terms {
        line(out, "Terms", terms);
    }
    footer(out, expense);
}

#[derive(Debug, PartialEq)]
struct LineItem {
    name: String,
    quantity: Option<f64>,
    price: Option<f64>,
}

impl LineItem {
    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(LineItem {
            name: text(obj, &["name", "description", "item"]).unwrap_or_else(|| "Item".to_string()),
            quantity: obj.get("quantity").or_else(|| obj.get("qty")).and_then(as_amount),
            price: obj
                .get("price")
                .or_else(|| obj.get("total_price"))
                .and_then(as_amount),
        })
    }

    fn render(&self, currency: &str) -> String {
        let qty = self.quantity.unwrap_or(1.0);
        let price = self
            .price
            .map(|p| format_money(currency, p))
            .unwrap_or_default();
        format!("{:<28} x{:<4} {}", self.name, qty, price)
    }
}

fn parse_items(items: Option<&Items>) -> Option<Vec<LineItem>> {
    let list = match items? {
        Items::List(list) => list.clone(),
        Items::Text(text) => serde_json::from_str::<Vec<Value>>(text).ok()?,
    };
    list.iter().map(LineItem::from_value).collect()
}

fn restaurant_card(out: &mut String, record: &ExpenseRecord) {
    let expense = &record.expense;
    let vendor = expense
        .vendor_name
        .clone()
        .or_else(|| raw_text(expense, "restaurant_name"));
    header(out, record, vendor.as_deref());

    if let Some(date) = &expense.date {
        line(out, "Date", date);
    }
    if let Some(time) = expense.receipt_time.clone().or_else(|| raw_text(expense, "time")) {
        line(out, "Time", time);
    }
    if let Some(order) = &expense.order_number {
        line(out, "Order", format!("#{}", order));
    }
    if let Some(server) = &expense.server_name {
        line(out, "Server", server);
    }

    let currency = &expense.currency;
    match parse_items(expense.items.as_ref()) {
        Some(items) if !items.is_empty() => {
            let rows: Vec<String> = items.iter().map(|item| item.render(currency)).collect();
            write_block(out, "Items", &rows.join("\n"));
        }
        _ => {
            if let Some(items) = expense.items.as_ref().filter(|i| !i.is_empty()) {
                write_block(out, "Items", &items_text(items).replace("(undefinedx)", "(1x)"));
            }
        }
    }

    let subtotal = nonzero(expense.subtotal).or_else(|| raw_amount(expense, "subtotal"));
    line(out, "Subtotal", format_money(currency, subtotal.unwrap_or(0.0)));
    if let Some(tip) = expense.tip_amount.filter(|tip| *tip > 0.0) {
        line(out, "Tip", format_money(currency, tip));
    }
    let tax = nonzero(expense.tax_amount).or_else(|| raw_amount(expense, "tax_amount"));
    line(out, "Tax", format_money(currency, tax.unwrap_or(0.0)));
    let total = nonzero(expense.total_amount)
        .or_else(|| raw_amount(expense, "total_amount"))
        .unwrap_or_else(|| display_total(expense));
    line(out, "Total", format_money(currency, total));

    if let Some(confidence) = raw(expense).and_then(|obj| obj.get("confidence_score")).filter(|v| truthy(v)) {
        line(out, "Confidence", plain(confidence));
    }
    footer(out, expense);
}

fn grocery_card(out: &mut String, record: &ExpenseRecord) {
    let expense = &record.expense;
    let vendor = expense
        .vendor_name
        .clone()
        .or_else(|| raw_text(expense, "store_name"));
    header(out, record, vendor.as_deref());
    if let Some(date) = &expense.date {
        line(out, "Date", date);
    }

    let currency = &expense.currency;
    let raw_items = raw(expense)
        .and_then(|obj| obj.get("items"))
        .and_then(|v| v.as_array())
        .map(|list| Items::List(list.clone()));
    let items = parse_items(expense.items.as_ref())
        .or_else(|| parse_items(raw_items.as_ref()))
        .unwrap_or_default();
    if !items.is_empty() {
        let rows: Vec<String> = items.iter().map(|item| item.render(currency)).collect();
        write_block(out, "Items", &rows.join("\n"));
    }
    let count = raw_amount(expense, "total_items_count")
        .map(|c| c as usize)
        .unwrap_or(items.len());
    line(out, "Item count", count);

    let subtotal = nonzero(expense.subtotal).or_else(|| raw_amount(expense, "subtotal"));
    line(out, "Subtotal", format_money(currency, subtotal.unwrap_or(0.0)));
    let tax = nonzero(expense.tax_amount).or_else(|| raw_amount(expense, "tax"));
    if let Some(tax) = tax.filter(|t| *t > 0.0) {
        line(out, "Tax", format_money(currency, tax));
    }
    let total = nonzero(expense.total_amount).or_else(|| raw_amount(expense, "total"));
    line(out, "Total", format_money(currency, total.unwrap_or(0.0)));

    if let Some(confidence) = raw(expense).and_then(|obj| obj.get("confidence")).filter(|v| truthy(v)) {
        line(out, "Confidence", plain(confidence));
    }
    footer(out, expense);
}

fn generic_card(out: &mut String, record: &ExpenseRecord) {
    let expense = &record.expense;
    header(out, record, expense.vendor_name.as_deref());
    if let Some(date) = &expense.date {
        line(out, "Date", date);
    }
    if let Some(items) = expense.items.as_ref().filter(|i| !i.is_empty()) {
        write_block(out, "Items", &items_text(items));
    }
    let currency = &expense.currency;
    if let Some(subtotal) = nonzero(expense.subtotal) {
        line(out, "Subtotal", format_money(currency, subtotal));
    }
    if let Some(tax) = nonzero(expense.tax_amount) {
        line(out, "Tax", format_money(currency, tax));
    }
    let total = display_total(expense);
    if total != 0.0 {
        line(out, "Total", format_money(currency, total));
    }
    footer(out, expense);
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cyclic cursor over a non-empty list of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Carousel {
    len: usize,
    index: usize,
}

impl Carousel {
    pub fn new(len: usize) -> Option<Self> {
        (len > 0).then_some(Carousel { len, index: 0 })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn next(&mut self) -> usize {
        self.index = (self.index + 1) % self.len;
        self.index
    }

    pub fn prev(&mut self) -> usize {
        self.index = (self.index + self.len - 1) % self.len;
        self.index
    }

    pub fn go_to(&mut self, index: usize) -> usize {
        self.index = index % self.len;
        self.index
    }
}
