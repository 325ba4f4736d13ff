//! Predicate-list query builder
//!
//! Filters are turned into an ordered list of conditions over fixed column
//! names. Values only ever reach the statement as bound parameters.

use std::net::IpAddr;

use sqlx::{QueryBuilder, Sqlite};

use super::filters::Order;
use super::models::normalize_ip;

/// Bound parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Param {
    Text(String),
    Int(i64),
}

/// One condition of a WHERE clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Condition {
    Eq(&'static str, Param),
    AnyOf(&'static str, Vec<Param>),
    AtLeast(&'static str, Param),
    AtMost(&'static str, Param),
}

/// Ordered list of conditions, ANDed together
#[derive(Debug, Clone, Default)]
pub(crate) struct Predicates {
    conditions: Vec<Condition>,
}

impl Predicates {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Equality on a text column; `None` and empty strings are skipped
    pub(crate) fn text(&mut self, column: &'static str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.conditions
                .push(Condition::Eq(column, Param::Text(value.to_string())));
        }
        self
    }

    /// Membership in a list of text values; an empty list is skipped
    pub(crate) fn any_text(&mut self, column: &'static str, values: &[String]) -> &mut Self {
        if !values.is_empty() {
            let params = values.iter().map(|v| Param::Text(v.clone())).collect();
            self.conditions.push(Condition::AnyOf(column, params));
        }
        self
    }

    /// Equality on an IP address column, after normalisation
    pub(crate) fn ip(&mut self, column: &'static str, value: Option<IpAddr>) -> &mut Self {
        if let Some(ip) = value {
            self.conditions
                .push(Condition::Eq(column, Param::Text(normalize_ip(ip).to_string())));
        }
        self
    }

    /// Inclusive slot bounds
    pub(crate) fn slot_range(
        &mut self,
        column: &'static str,
        from: Option<u32>,
        to: Option<u32>,
    ) -> &mut Self {
        if let Some(from) = from {
            self.conditions
                .push(Condition::AtLeast(column, Param::Int(i64::from(from))));
        }
        if let Some(to) = to {
            self.conditions
                .push(Condition::AtMost(column, Param::Int(i64::from(to))));
        }
        self
    }

    /// Number of values bound by the WHERE clause
    pub(crate) fn param_count(&self) -> usize {
        self.conditions
            .iter()
            .map(|condition| match condition {
                Condition::AnyOf(_, params) => params.len(),
                _ => 1,
            })
            .sum()
    }

    /// Append ` WHERE a AND b ...`; nothing when the list is empty
    pub(crate) fn push_where<'args>(&self, qb: &mut QueryBuilder<'args, Sqlite>) {
        for (i, condition) in self.conditions.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            match condition {
                Condition::Eq(column, param) => {
                    qb.push(*column).push(" = ");
                    push_param(qb, param);
                }
                Condition::AtLeast(column, param) => {
                    qb.push(*column).push(" >= ");
                    push_param(qb, param);
                }
                Condition::AtMost(column, param) => {
                    qb.push(*column).push(" <= ");
                    push_param(qb, param);
                }
                Condition::AnyOf(column, params) => {
                    qb.push(*column).push(" IN (");
                    for (j, param) in params.iter().enumerate() {
                        if j > 0 {
                            qb.push(", ");
                        }
                        push_param(qb, param);
                    }
                    qb.push(")");
                }
            }
        }
    }
}

fn push_param<'args>(qb: &mut QueryBuilder<'args, Sqlite>, param: &Param) {
    match param {
        Param::Text(value) => qb.push_bind(value.clone()),
        Param::Int(value) => qb.push_bind(*value),
    };
}

/// Append ` ORDER BY <slot> <dir>, <tiebreak>...`
pub(crate) fn push_order<'args>(
    qb: &mut QueryBuilder<'args, Sqlite>,
    slot_column: &'static str,
    order: Order,
    tiebreak: &[&'static str],
) {
    qb.push(" ORDER BY ")
        .push(slot_column)
        .push(" ")
        .push(order.direction());
    for column in tiebreak {
        qb.push(", ").push(*column);
    }
}

/// Append ` LIMIT ?` unless the limit is 0
pub(crate) fn push_limit<'args>(qb: &mut QueryBuilder<'args, Sqlite>, limit: u32) {
    if limit != 0 {
        qb.push(" LIMIT ").push_bind(i64::from(limit));
    }
}

pub(crate) fn trace_query(qb: &QueryBuilder<'_, Sqlite>, predicates: &Predicates) {
    tracing::trace!(query = qb.sql(), params = predicates.param_count(), "SQL query");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(predicates: &Predicates) -> String {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT f_slot FROM t_test");
        predicates.push_where(&mut qb);
        qb.sql().to_string()
    }

    #[test]
    fn test_empty_predicates_add_no_where() {
        assert_eq!(render(&Predicates::new()), "SELECT f_slot FROM t_test");
    }

    #[test]
    fn test_empty_values_are_skipped() {
        let mut predicates = Predicates::new();
        predicates
            .text("f_source", Some(""))
            .text("f_method", None)
            .any_text("f_source", &[])
            .ip("f_ip_addr", None)
            .slot_range("f_slot", None, None);
        assert_eq!(predicates.param_count(), 0);
    }

    #[test]
    fn test_conditions_are_anded_with_placeholders() {
        let mut predicates = Predicates::new();
        predicates
            .ip("f_ip_addr", Some("::ffff:192.168.1.1".parse().unwrap()))
            .any_text("f_source", &["a".to_string(), "b".to_string()])
            .slot_range("f_slot", Some(10), Some(20));
        assert_eq!(predicates.param_count(), 5);
        assert_eq!(
            render(&predicates),
            "SELECT f_slot FROM t_test WHERE f_ip_addr = ? AND f_source IN (?, ?) AND f_slot >= ? AND f_slot <= ?"
        );
        assert_eq!(
            predicates.conditions[0],
            Condition::Eq("f_ip_addr", Param::Text("192.168.1.1".to_string()))
        );
    }

    #[test]
    fn test_values_never_appear_in_sql_text() {
        let mut predicates = Predicates::new();
        predicates.text("f_source", Some("x'; DROP TABLE t_test; --"));
        let sql = render(&predicates);
        assert!(!sql.contains("DROP"));
        assert!(sql.ends_with("f_source = ?"));
    }

    #[test]
    fn test_order_and_limit() {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT f_slot FROM t_test");
        push_order(&mut qb, "f_slot", Order::Latest, &["f_method", "f_ip_addr"]);
        push_limit(&mut qb, 5);
        assert_eq!(
            qb.sql(),
            "SELECT f_slot FROM t_test ORDER BY f_slot DESC, f_method, f_ip_addr LIMIT ?"
        );

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT f_slot FROM t_test");
        push_order(&mut qb, "f_slot", Order::Earliest, &[]);
        push_limit(&mut qb, 0);
        assert_eq!(qb.sql(), "SELECT f_slot FROM t_test ORDER BY f_slot ASC");
    }
}
