//! Derived figures over expense lists: totals, installment progress,
//! filtering, grouping and pagination. Pure functions shared by the API
//! handlers and the client cache.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::dates::month_label;
use crate::core::models::{Gasto, Grupo, GrupoMembership};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub total_amount: f64,
    pub paid_amount: f64,
    pub pending_amount: f64,
    pub count: usize,
}

impl Totals {
    fn add(&mut self, gasto: &Gasto) {
        self.total_amount += gasto.monto;
        if gasto.is_paid() {
            self.paid_amount += gasto.monto;
        }
        self.pending_amount += gasto.pending_amount();
        self.count += 1;
    }
}

/// Top-level totals add every amount as-is, the way the dashboard shows them.
/// `by_currency` keeps each moneda apart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GastoStats {
    #[serde(flatten)]
    pub totals: Totals,
    pub by_currency: BTreeMap<String, Totals>,
}

pub fn gasto_stats(gastos: &[Gasto]) -> GastoStats {
    let mut stats = GastoStats::default();
    for gasto in gastos {
        stats.totals.add(gasto);
        stats
            .by_currency
            .entry(gasto.moneda.clone())
            .or_default()
            .add(gasto);
    }
    stats
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Estado {
    #[default]
    Todos,
    Pagado,
    Pendiente,
}

impl Estado {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Todos" | "" => Some(Estado::Todos),
            "Pagado" => Some(Estado::Pagado),
            "Pendiente" => Some(Estado::Pendiente),
            _ => None,
        }
    }

    pub fn matches(&self, gasto: &Gasto) -> bool {
        match self {
            Estado::Todos => true,
            Estado::Pagado => gasto.is_paid(),
            Estado::Pendiente => !gasto.is_paid(),
        }
    }
}

/// Case-insensitive substring match on vendedor, categoria or comentarios,
/// then the paid/pending filter. Input order is kept.
pub fn filter_gastos(gastos: &[Gasto], search: &str, estado: Estado) -> Vec<Gasto> {
    let needle = search.trim().to_lowercase();
    gastos
        .iter()
        .filter(|g| {
            needle.is_empty()
                || g.vendedor.to_lowercase().contains(&needle)
                || g.categoria.to_lowercase().contains(&needle)
                || g.comentarios.to_lowercase().contains(&needle)
        })
        .filter(|g| estado.matches(g))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Categoria,
    Vendedor,
    Estado,
    Mes,
}

impl GroupBy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "categoria" => Some(GroupBy::Categoria),
            "vendedor" => Some(GroupBy::Vendedor),
            "estado" => Some(GroupBy::Estado),
            "mes" => Some(GroupBy::Mes),
            _ => None,
        }
    }

    fn key(&self, gasto: &Gasto) -> String {
        match self {
            GroupBy::Categoria if gasto.categoria.is_empty() => "Sin categoría".to_string(),
            GroupBy::Categoria => gasto.categoria.clone(),
            GroupBy::Vendedor if gasto.vendedor.is_empty() => "Sin vendedor".to_string(),
            GroupBy::Vendedor => gasto.vendedor.clone(),
            GroupBy::Estado if gasto.is_paid() => "Pagado".to_string(),
            GroupBy::Estado => "Pendiente".to_string(),
            GroupBy::Mes => month_label(gasto.fecha_gasto),
        }
    }
}

pub const ALL_GROUP: &str = "Todos los gastos";

/// Groups sorted by key. Without a key everything lands in one group.
pub fn group_gastos(gastos: &[Gasto], by: Option<GroupBy>) -> BTreeMap<String, Vec<Gasto>> {
    let mut groups: BTreeMap<String, Vec<Gasto>> = BTreeMap::new();
    match by {
        None => {
            groups.insert(ALL_GROUP.to_string(), gastos.to_vec());
        }
        Some(by) => {
            for gasto in gastos {
                groups.entry(by.key(gasto)).or_default().push(gasto.clone());
            }
        }
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
}

pub fn total_pages(total: usize, per_page: usize) -> usize {
    if per_page == 0 {
        return 0;
    }
    total.div_ceil(per_page)
}

/// 1-based slice. Page 0 reads as page 1 and pages past the end are empty.
pub fn paginate<T: Clone>(items: &[T], page: usize, per_page: usize) -> Page<T> {
    let page = page.max(1);
    let per_page = per_page.max(1);
    let start = (page - 1).saturating_mul(per_page);
    let slice = items
        .iter()
        .skip(start)
        .take(per_page)
        .cloned()
        .collect();
    Page {
        items: slice,
        page,
        per_page,
        total: items.len(),
        total_pages: total_pages(items.len(), per_page),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GastoGroup {
    pub name: String,
    /// Size of the whole group, not of this page.
    pub count: usize,
    pub items: Vec<Gasto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GastoPage {
    pub groups: Vec<GastoGroup>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
    pub stats: GastoStats,
}

/// Page count comes from the flattened list. Each group shows the same slice
/// window of its own items, and groups left empty past page 1 are dropped.
pub fn gasto_page(gastos: &[Gasto], by: Option<GroupBy>, page: usize, per_page: usize) -> GastoPage {
    let page = page.max(1);
    let per_page = per_page.max(1);
    let groups = group_gastos(gastos, by)
        .into_iter()
        .filter_map(|(name, items)| {
            let slice = paginate(&items, page, per_page);
            if slice.items.is_empty() && page > 1 {
                return None;
            }
            Some(GastoGroup {
                name,
                count: items.len(),
                items: slice.items,
            })
        })
        .collect();

    GastoPage {
        groups,
        page,
        per_page,
        total: gastos.len(),
        total_pages: total_pages(gastos.len(), per_page),
        stats: gasto_stats(gastos),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrupoStats {
    pub active_members: usize,
    pub total_members: usize,
    pub expense_count: usize,
    pub total_expenses: f64,
    pub avg_per_member: f64,
    pub recent_expenses: usize,
    pub is_active: bool,
    pub is_expired: bool,
    pub is_expiring_soon: bool,
    pub days_until_expiry: Option<i64>,
}

const RECENT_DAYS: i64 = 7;
const EXPIRY_WARNING_DAYS: i64 = 7;

pub fn grupo_stats(
    grupo: &Grupo,
    members: &[GrupoMembership],
    gastos: &[Gasto],
    today: NaiveDate,
) -> GrupoStats {
    let total_expenses: f64 = gastos.iter().map(|g| g.monto).sum();
    let avg_per_member = if members.is_empty() {
        0.0
    } else {
        total_expenses / members.len() as f64
    };
    let recent_cutoff = today - Duration::days(RECENT_DAYS);
    let days_until_expiry = grupo.end_date.map(|end| (end - today).num_days());
    let is_expired = matches!(days_until_expiry, Some(d) if d < 0);
    let is_expiring_soon = matches!(days_until_expiry, Some(d) if (0..=EXPIRY_WARNING_DAYS).contains(&d));

    GrupoStats {
        active_members: members.iter().filter(|m| m.is_active).count(),
        total_members: members.len(),
        expense_count: gastos.len(),
        total_expenses,
        avg_per_member,
        recent_expenses: gastos.iter().filter(|g| g.fecha_gasto > recent_cutoff).count(),
        is_active: grupo.is_active,
        is_expired,
        is_expiring_soon,
        days_until_expiry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Role;
    use chrono::Utc;

    fn gasto(id: i64, monto: f64, moneda: &str, realizados: i64, totales: i64) -> Gasto {
        Gasto {
            id,
            user: 1,
            monto,
            moneda: moneda.into(),
            pagos_realizados: realizados,
            pagos_totales: totales,
            medio_pago: 1,
            vendedor: format!("Vendedor {}", id),
            categoria: "comida".into(),
            comentarios: String::new(),
            fecha_gasto: NaiveDate::from_ymd_opt(2026, 10, id as u32).unwrap(),
            grupo: None,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_stats_totals_and_currencies() {
        let gastos = vec![
            gasto(1, 1000.0, "ARS", 1, 1),
            gasto(2, 1200.0, "ARS", 1, 4),
            gasto(3, 50.0, "USD", 0, 2),
        ];
        let stats = gasto_stats(&gastos);
        assert_eq!(stats.totals.count, 3);
        assert_eq!(stats.totals.total_amount, 2250.0);
        assert_eq!(stats.totals.paid_amount, 1000.0);
        assert!((stats.totals.pending_amount - 950.0).abs() < 1e-9);

        let ars = stats.by_currency["ARS"];
        assert_eq!(ars.count, 2);
        assert!((ars.pending_amount - 900.0).abs() < 1e-9);
        assert_eq!(stats.by_currency["USD"].pending_amount, 50.0);
    }

    #[test]
    fn test_filter_by_search_and_estado() {
        let mut gastos = vec![
            gasto(1, 10.0, "ARS", 1, 1),
            gasto(2, 10.0, "ARS", 0, 3),
            gasto(3, 10.0, "ARS", 0, 1),
        ];
        gastos[2].comentarios = "Regalo de CUMPLE".into();

        assert_eq!(filter_gastos(&gastos, "", Estado::Todos).len(), 3);
        assert_eq!(filter_gastos(&gastos, "", Estado::Pagado).len(), 1);
        assert_eq!(filter_gastos(&gastos, "", Estado::Pendiente).len(), 2);

        let hits = filter_gastos(&gastos, "cumple", Estado::Todos);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 3);
        assert!(filter_gastos(&gastos, "COMIDA", Estado::Pagado)
            .iter()
            .all(|g| g.id == 1));
    }

    #[test]
    fn test_group_keys_are_sorted() {
        let mut gastos = vec![
            gasto(1, 10.0, "ARS", 1, 1),
            gasto(2, 10.0, "ARS", 0, 2),
        ];
        gastos[1].fecha_gasto = date(2026, 9, 30);
        gastos[1].vendedor.clear();

        let by_estado = group_gastos(&gastos, Some(GroupBy::Estado));
        assert_eq!(
            by_estado.keys().collect::<Vec<_>>(),
            vec!["Pagado", "Pendiente"]
        );

        let by_mes = group_gastos(&gastos, Some(GroupBy::Mes));
        assert_eq!(
            by_mes.keys().collect::<Vec<_>>(),
            vec!["octubre de 2026", "septiembre de 2026"]
        );

        let by_vendedor = group_gastos(&gastos, Some(GroupBy::Vendedor));
        assert!(by_vendedor.contains_key("Sin vendedor"));

        let all = group_gastos(&gastos, None);
        assert_eq!(all[ALL_GROUP].len(), 2);
    }

    #[test]
    fn test_paginate_bounds() {
        let items: Vec<i32> = (1..=23).collect();
        let page = paginate(&items, 3, 10);
        assert_eq!(page.items, vec![21, 22, 23]);
        assert_eq!(page.total_pages, 3);

        assert_eq!(paginate(&items, 0, 10).page, 1);
        assert!(paginate(&items, 9, 10).items.is_empty());
        assert_eq!(paginate::<i32>(&[], 1, 10).total_pages, 0);
    }

    #[test]
    fn test_gasto_page_drops_exhausted_groups() {
        let mut gastos: Vec<Gasto> = (1..=12).map(|i| gasto(i, 10.0, "ARS", 0, 1)).collect();
        gastos[0].pagos_realizados = 1;

        let first = gasto_page(&gastos, Some(GroupBy::Estado), 1, 5);
        assert_eq!(first.groups.len(), 2);
        assert_eq!(first.groups[0].name, "Pagado");
        assert_eq!(first.groups[0].count, 1);
        assert_eq!(first.total_pages, 3);

        let second = gasto_page(&gastos, Some(GroupBy::Estado), 2, 5);
        assert_eq!(second.groups.len(), 1);
        assert_eq!(second.groups[0].name, "Pendiente");
        assert_eq!(second.groups[0].count, 11);
        assert_eq!(second.groups[0].items.len(), 5);
    }

    #[test]
    fn test_grupo_stats() {
        let now = Utc::now();
        let grupo = Grupo {
            id: 1,
            name: "Viaje".into(),
            description: String::new(),
            grupo_type: "trip".into(),
            default_currency: "ARS".into(),
            start_date: None,
            end_date: Some(date(2026, 10, 20)),
            is_active: true,
            allow_new_members: true,
            created_by: 1,
            created_at: now,
            updated_at: now,
        };
        let member = |id: i64, active: bool| GrupoMembership {
            id,
            grupo: 1,
            user: id,
            username: format!("u{}", id),
            role: Role::Member,
            is_active: active,
            joined_at: now,
        };
        let members = vec![member(1, true), member(2, true), member(3, false)];
        let gastos = vec![gasto(1, 300.0, "ARS", 0, 1), gasto(15, 600.0, "ARS", 0, 1)];

        let stats = grupo_stats(&grupo, &members, &gastos, date(2026, 10, 17));
        assert_eq!(stats.active_members, 2);
        assert_eq!(stats.total_members, 3);
        assert_eq!(stats.total_expenses, 900.0);
        assert_eq!(stats.avg_per_member, 300.0);
        assert_eq!(stats.recent_expenses, 1);
        assert_eq!(stats.days_until_expiry, Some(3));
        assert!(stats.is_expiring_soon);
        assert!(!stats.is_expired);

        let later = grupo_stats(&grupo, &members, &gastos, date(2026, 11, 1));
        assert!(later.is_expired);
        assert!(!later.is_expiring_soon);
    }
}
