// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "api_rate_limits")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub api_name: String,
    pub endpoint: String,
    pub tenant_id: String,
    #[sea_orm(column_type = "Double")]
    pub calls_per_second: f64,
    pub burst_size: i32,
    #[sea_orm(column_type = "Double")]
    pub tokens_available: f64,
    pub last_refill_at: ChronoDateTimeWithTimeZone,
    pub calls_today: i32,
    pub calls_this_hour: i32,
    pub last_call_at: Option<ChronoDateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
