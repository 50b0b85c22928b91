//! Diesel row structs for `restaurants` and `demand_history`, plus conversions
//! to and from the domain types.

use chrono::NaiveDate;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::demand::{DemandRecord, RestaurantProfile};
use crate::schema;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::restaurants)]
pub struct Restaurant {
    pub id: i64,
    pub name: String,
    pub city: Option<String>,
    pub address: String,
    pub zip_code: String,
    pub restaurant_type: Option<String>,
    pub urban_context: Option<String>,
    pub academy: Option<String>,
}

impl From<Restaurant> for RestaurantProfile {
    fn from(r: Restaurant) -> Self {
        RestaurantProfile {
            id: r.id,
            name: r.name,
            city: r.city,
            address: r.address,
            zip_code: r.zip_code,
            restaurant_type: r.restaurant_type,
            urban_context: r.urban_context,
            academy: r.academy,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::demand_history)]
pub struct DemandRow {
    pub id: i64,
    pub restaurant_id: i64,
    pub date: NaiveDate,
    pub holiday_name: Option<String>,
    pub is_holiday: bool,
    pub is_school_vacations: bool,
    pub vacation_name: Option<String>,
    pub weather_code: Option<i32>,
    pub tmax: Option<f64>,
    pub tmin: Option<f64>,
    pub precipitation: Option<f64>,
    pub wind_speed: Option<f64>,
    pub day_of_week: String,
    pub is_weekend: bool,
    pub affluence: i32,
    pub occupancy_rate: f64,
    pub is_full: bool,
}

impl DemandRow {
    /// `sip` is not persisted; the record comes back with 0 and callers rescore it.
    pub fn into_record(self) -> DemandRecord {
        DemandRecord {
            date: self.date,
            restaurant_id: self.restaurant_id,
            day_of_week: self.day_of_week,
            is_weekend: self.is_weekend,
            is_holiday: self.is_holiday,
            holiday_name: self.holiday_name,
            is_school_vacation: self.is_school_vacations,
            vacation_name: self.vacation_name,
            weather_code: self.weather_code,
            tmax: self.tmax,
            tmin: self.tmin,
            precipitation: self.precipitation,
            wind_speed: self.wind_speed,
            sip: 0.0,
            affluence: u32::try_from(self.affluence).unwrap_or(0),
            occupancy_rate: self.occupancy_rate,
            is_full: self.is_full,
        }
    }
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::demand_history)]
pub struct NewDemandRow {
    pub restaurant_id: i64,
    pub date: NaiveDate,
    pub holiday_name: Option<String>,
    pub is_holiday: bool,
    pub is_school_vacations: bool,
    pub vacation_name: Option<String>,
    pub weather_code: Option<i32>,
    pub tmax: Option<f64>,
    pub tmin: Option<f64>,
    pub precipitation: Option<f64>,
    pub wind_speed: Option<f64>,
    pub day_of_week: String,
    pub is_weekend: bool,
    pub affluence: i32,
    pub occupancy_rate: f64,
    pub is_full: bool,
}

impl From<&DemandRecord> for NewDemandRow {
    fn from(r: &DemandRecord) -> Self {
        NewDemandRow {
            restaurant_id: r.restaurant_id,
            date: r.date,
            holiday_name: r.holiday_name.clone(),
            is_holiday: r.is_holiday,
            is_school_vacations: r.is_school_vacation,
            vacation_name: r.vacation_name.clone(),
            weather_code: r.weather_code,
            tmax: r.tmax,
            tmin: r.tmin,
            precipitation: r.precipitation,
            wind_speed: r.wind_speed,
            day_of_week: r.day_of_week.clone(),
            is_weekend: r.is_weekend,
            affluence: i32::try_from(r.affluence).unwrap_or(i32::MAX),
            occupancy_rate: r.occupancy_rate,
            is_full: r.is_full,
        }
    }
}
