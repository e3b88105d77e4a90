use crate::errors::{AppError, AppResult};
use crate::models::{PeriodType, StandardizedPeriod};
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};

/// Textual form of period boundaries, both in storage and in identifiers.
pub const PERIOD_DATE_FORMAT: &str = "%Y-%m-%d";

const DAILY_MAX_SPAN: i64 = 1;
const WEEKLY_MAX_SPAN: i64 = 7;
const MONTHLY_MAX_SPAN: i64 = 31;
const QUARTERLY_MAX_SPAN: i64 = 92;
const YEARLY_MAX_SPAN: i64 = 366;

/// Standardize a raw request window. Time of day is dropped after moving both
/// instants to UTC so hour and millisecond noise cannot shift the bucket.
pub fn standardize_range(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<StandardizedPeriod> {
    standardize(start.date_naive(), end.date_naive())
}

pub fn standardize(start: NaiveDate, end: NaiveDate) -> AppResult<StandardizedPeriod> {
    let period_type = classify_span((end - start).num_days());
    let (canonical_start, canonical_end) = match period_type {
        PeriodType::Daily | PeriodType::Custom => (start, end),
        PeriodType::Weekly => (week_start(start)?, week_end(end)?),
        PeriodType::Monthly => month_bounds(start.year(), start.month())?,
        PeriodType::Quarterly => quarter_bounds(start)?,
        PeriodType::Yearly => (
            ymd(start.year(), 1, 1)?,
            ymd(start.year(), 12, 31)?,
        ),
    };

    if canonical_end < canonical_start {
        tracing::error!(
            start = %start,
            end = %end,
            period_type = period_type.as_str(),
            "standardized period ends before it starts"
        );
        return Err(AppError::MalformedPeriod(format!(
            "{} period {} .. {} ends before it starts",
            period_type.as_str(),
            format_period_date(canonical_start),
            format_period_date(canonical_end),
        )));
    }

    Ok(StandardizedPeriod {
        start: canonical_start,
        end: canonical_end,
        period_type,
    })
}

pub fn classify_span(span_days: i64) -> PeriodType {
    if span_days <= DAILY_MAX_SPAN {
        PeriodType::Daily
    } else if span_days <= WEEKLY_MAX_SPAN {
        PeriodType::Weekly
    } else if span_days <= MONTHLY_MAX_SPAN {
        PeriodType::Monthly
    } else if span_days <= QUARTERLY_MAX_SPAN {
        PeriodType::Quarterly
    } else if span_days <= YEARLY_MAX_SPAN {
        PeriodType::Yearly
    } else {
        PeriodType::Custom
    }
}

pub fn format_period_date(date: NaiveDate) -> String {
    date.format(PERIOD_DATE_FORMAT).to_string()
}

impl StandardizedPeriod {
    /// Number of days between the boundaries, matching the classification span.
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// The standardized period of the same type that immediately precedes this one.
    pub fn previous(&self) -> AppResult<StandardizedPeriod> {
        let day_before = shift_back(self.start, 1)?;
        let (start, end) = match self.period_type {
            PeriodType::Daily => {
                let span = u64::try_from(self.span_days()).unwrap_or(0);
                (shift_back(day_before, span)?, day_before)
            }
            PeriodType::Weekly => {
                let weeks = u64::try_from(self.span_days() / 7).unwrap_or(0);
                (shift_back(self.start, 7 * (weeks + 1))?, day_before)
            }
            PeriodType::Monthly => month_bounds(day_before.year(), day_before.month())?,
            PeriodType::Quarterly => quarter_bounds(day_before)?,
            PeriodType::Yearly => (ymd(day_before.year(), 1, 1)?, day_before),
            PeriodType::Custom => {
                let span = u64::try_from(self.span_days()).unwrap_or(0);
                (shift_back(day_before, span)?, day_before)
            }
        };
        Ok(StandardizedPeriod {
            start,
            end,
            period_type: self.period_type,
        })
    }
}

fn week_start(date: NaiveDate) -> AppResult<NaiveDate> {
    shift_back(date, u64::from(date.weekday().num_days_from_monday()))
}

fn week_end(date: NaiveDate) -> AppResult<NaiveDate> {
    let remaining = 6 - u64::from(date.weekday().num_days_from_monday());
    date.checked_add_days(Days::new(remaining))
        .ok_or_else(|| out_of_range(date))
}

fn month_bounds(year: i32, month: u32) -> AppResult<(NaiveDate, NaiveDate)> {
    let first = ymd(year, month, 1)?;
    let next_first = if month == 12 {
        ymd(year + 1, 1, 1)?
    } else {
        ymd(year, month + 1, 1)?
    };
    Ok((first, shift_back(next_first, 1)?))
}

fn quarter_bounds(date: NaiveDate) -> AppResult<(NaiveDate, NaiveDate)> {
    let first_month = (date.month0() / 3) * 3 + 1;
    let (start, _) = month_bounds(date.year(), first_month)?;
    let (_, end) = month_bounds(date.year(), first_month + 2)?;
    Ok((start, end))
}

fn shift_back(date: NaiveDate, days: u64) -> AppResult<NaiveDate> {
    date.checked_sub_days(Days::new(days))
        .ok_or_else(|| out_of_range(date))
}

fn ymd(year: i32, month: u32, day: u32) -> AppResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        AppError::MalformedPeriod(format!("date {year:04}-{month:02}-{day:02} is out of range"))
    })
}

fn out_of_range(date: NaiveDate) -> AppError {
    AppError::MalformedPeriod(format!("period around {date} is out of range"))
}
