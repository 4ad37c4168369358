use crate::client::MarketDataClient;
use agent_core::{
    AgentError, AgentResult, AnalystSnapshot, BalanceRow, CashFlowRow, EarningsEvent,
    FinancialRow, FundamentalsSnapshot, InsiderSummary,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde_json::Value;

impl MarketDataClient {
    async fn quote_summary(&self, symbol: &str, modules: &str) -> AgentResult<Value> {
        let url = format!(
            "{}/v10/finance/quoteSummary/{}?modules={}",
            self.base_url, symbol, modules
        );
        let value = self.get_json(&url).await?;
        value
            .pointer("/quoteSummary/result/0")
            .cloned()
            .ok_or_else(|| AgentError::Collector {
                step: "quote_summary".to_string(),
                message: format!("no summary data for {symbol}"),
            })
    }

    /// Valuation/profitability snapshot as of today.
    pub async fn fundamentals_snapshot(&self, symbol: &str) -> AgentResult<FundamentalsSnapshot> {
        let summary = self
            .quote_summary(symbol, "summaryDetail,defaultKeyStatistics,financialData")
            .await?;

        let snapshot = FundamentalsSnapshot {
            symbol: symbol.to_string(),
            snapshot_date: Utc::now().date_naive(),
            market_cap: raw(&summary, "summaryDetail", "marketCap"),
            enterprise_value: raw(&summary, "defaultKeyStatistics", "enterpriseValue"),
            pe_ratio: raw(&summary, "summaryDetail", "trailingPE"),
            forward_pe: raw(&summary, "summaryDetail", "forwardPE"),
            peg_ratio: raw(&summary, "defaultKeyStatistics", "pegRatio"),
            price_to_book: raw(&summary, "defaultKeyStatistics", "priceToBook"),
            price_to_sales: raw(&summary, "summaryDetail", "priceToSalesTrailing12Months"),
            ev_to_ebitda: raw(&summary, "defaultKeyStatistics", "enterpriseToEbitda"),
            gross_margin: raw(&summary, "financialData", "grossMargins"),
            operating_margin: raw(&summary, "financialData", "operatingMargins"),
            profit_margin: raw(&summary, "financialData", "profitMargins"),
            return_on_equity: raw(&summary, "financialData", "returnOnEquity"),
            return_on_assets: raw(&summary, "financialData", "returnOnAssets"),
            revenue: raw(&summary, "financialData", "totalRevenue"),
            revenue_growth_yoy: raw(&summary, "financialData", "revenueGrowth"),
            earnings_growth_yoy: raw(&summary, "financialData", "earningsGrowth"),
            eps_ttm: raw(&summary, "defaultKeyStatistics", "trailingEps"),
            forward_eps: raw(&summary, "defaultKeyStatistics", "forwardEps"),
            free_cash_flow: raw(&summary, "financialData", "freeCashflow"),
            dividend_yield: raw(&summary, "summaryDetail", "dividendYield"),
            payout_ratio: raw(&summary, "summaryDetail", "payoutRatio"),
            beta: raw(&summary, "summaryDetail", "beta"),
            shares_outstanding: raw(&summary, "defaultKeyStatistics", "sharesOutstanding"),
            short_percent_of_float: raw(&summary, "defaultKeyStatistics", "shortPercentOfFloat"),
        };
        Ok(snapshot)
    }

    /// Multi-year income-statement rows, most recent first.
    pub async fn financial_history(&self, symbol: &str) -> AgentResult<Vec<FinancialRow>> {
        let summary = self
            .quote_summary(symbol, "incomeStatementHistory")
            .await?;
        let statements = summary
            .pointer("/incomeStatementHistory/incomeStatementHistory")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(statements
            .iter()
            .filter_map(|s| {
                let year = end_date_year(s)?;
                Some(FinancialRow {
                    symbol: symbol.to_string(),
                    fiscal_year: year,
                    revenue: field(s, "totalRevenue"),
                    gross_profit: field(s, "grossProfit"),
                    operating_income: field(s, "operatingIncome"),
                    net_income: field(s, "netIncome"),
                    eps: field(s, "dilutedEPS"),
                })
            })
            .collect())
    }

    pub async fn balance_sheet_history(&self, symbol: &str) -> AgentResult<Vec<BalanceRow>> {
        let summary = self.quote_summary(symbol, "balanceSheetHistory").await?;
        let statements = summary
            .pointer("/balanceSheetHistory/balanceSheetStatements")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(statements
            .iter()
            .filter_map(|s| {
                let year = end_date_year(s)?;
                Some(BalanceRow {
                    symbol: symbol.to_string(),
                    fiscal_year: year,
                    total_assets: field(s, "totalAssets"),
                    total_liabilities: field(s, "totalLiab"),
                    current_assets: field(s, "totalCurrentAssets"),
                    current_liabilities: field(s, "totalCurrentLiabilities"),
                    total_equity: field(s, "totalStockholderEquity"),
                    cash_and_equivalents: field(s, "cash"),
                    long_term_debt: field(s, "longTermDebt"),
                    retained_earnings: field(s, "retainedEarnings"),
                })
            })
            .collect())
    }

    pub async fn cash_flow_history(&self, symbol: &str) -> AgentResult<Vec<CashFlowRow>> {
        let summary = self.quote_summary(symbol, "cashflowStatementHistory").await?;
        let statements = summary
            .pointer("/cashflowStatementHistory/cashflowStatements")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(statements
            .iter()
            .filter_map(|s| {
                let year = end_date_year(s)?;
                let operating = field(s, "totalCashFromOperatingActivities");
                let capex = field(s, "capitalExpenditures");
                let free_cash_flow = match (operating, capex) {
                    (Some(op), Some(capex)) => Some(op + capex),
                    _ => None,
                };
                Some(CashFlowRow {
                    symbol: symbol.to_string(),
                    fiscal_year: year,
                    operating_cash_flow: operating,
                    capital_expenditures: capex,
                    free_cash_flow,
                    dividends_paid: field(s, "dividendsPaid"),
                    net_borrowings: field(s, "netBorrowings"),
                })
            })
            .collect())
    }

    pub async fn analyst_snapshot(&self, symbol: &str) -> AgentResult<AnalystSnapshot> {
        let summary = self
            .quote_summary(symbol, "financialData,recommendationTrend")
            .await?;

        let trend = summary.pointer("/recommendationTrend/trend/0");
        let count = |key: &str| -> Option<i64> {
            trend.and_then(|t| t.get(key)).and_then(Value::as_i64)
        };
        let buys = count("strongBuy").unwrap_or(0) + count("buy").unwrap_or(0);
        let sells = count("sell").unwrap_or(0) + count("strongSell").unwrap_or(0);

        Ok(AnalystSnapshot {
            symbol: symbol.to_string(),
            snapshot_date: Utc::now().date_naive(),
            rating_mean: raw(&summary, "financialData", "recommendationMean"),
            target_mean: raw(&summary, "financialData", "targetMeanPrice"),
            target_high: raw(&summary, "financialData", "targetHighPrice"),
            target_low: raw(&summary, "financialData", "targetLowPrice"),
            buy_count: Some(buys),
            hold_count: count("hold"),
            sell_count: Some(sells),
        })
    }

    /// Aggregate raw insider transactions into a rolling 90-day summary.
    pub async fn insider_summary(&self, symbol: &str) -> AgentResult<InsiderSummary> {
        let summary = self.quote_summary(symbol, "insiderTransactions").await?;
        let transactions = summary
            .pointer("/insiderTransactions/transactions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let cutoff = Utc::now() - Duration::days(90);
        let mut net_shares = 0.0;
        let mut net_value = 0.0;
        let mut buys = 0i64;
        let mut sells = 0i64;

        for t in &transactions {
            let start = t
                .pointer("/startDate/raw")
                .and_then(Value::as_i64)
                .and_then(|ts| DateTime::from_timestamp(ts, 0));
            if start.map(|d| d < cutoff).unwrap_or(true) {
                continue;
            }
            let shares = field(t, "shares").unwrap_or(0.0);
            let value = field(t, "value").unwrap_or(0.0);
            let text = t
                .get("transactionText")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_lowercase();
            if text.contains("sale") {
                net_shares -= shares;
                net_value -= value;
                sells += 1;
            } else if text.contains("purchase") || text.contains("buy") {
                net_shares += shares;
                net_value += value;
                buys += 1;
            }
        }

        Ok(InsiderSummary {
            symbol: symbol.to_string(),
            snapshot_date: Utc::now().date_naive(),
            net_shares_90d: net_shares,
            net_value_90d: net_value,
            buy_count_90d: buys,
            sell_count_90d: sells,
        })
    }

    pub async fn earnings_calendar(&self, symbol: &str) -> AgentResult<Vec<EarningsEvent>> {
        let summary = self.quote_summary(symbol, "calendarEvents").await?;
        let dates = summary
            .pointer("/calendarEvents/earnings/earningsDate")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let estimate = summary
            .pointer("/calendarEvents/earnings/earningsAverage/raw")
            .and_then(Value::as_f64);

        Ok(dates
            .iter()
            .filter_map(|d| {
                let ts = d.get("raw").and_then(Value::as_i64)?;
                let date = DateTime::from_timestamp(ts, 0)?.date_naive();
                Some(EarningsEvent {
                    symbol: symbol.to_string(),
                    event_date: date,
                    period: format!("Q{}", (date.month0() / 3) + 1),
                    eps_estimate: estimate,
                    confirmed: dates.len() == 1,
                })
            })
            .collect())
    }
}

/// `{module: {field: {raw: <f64>}}}` accessor for summary payloads.
fn raw(summary: &Value, module: &str, key: &str) -> Option<f64> {
    summary
        .get(module)
        .and_then(|m| m.get(key))
        .and_then(|f| f.get("raw"))
        .and_then(Value::as_f64)
}

fn field(statement: &Value, key: &str) -> Option<f64> {
    statement
        .get(key)
        .and_then(|f| f.get("raw"))
        .and_then(Value::as_f64)
}

fn end_date_year(statement: &Value) -> Option<i32> {
    statement
        .pointer("/endDate/raw")
        .and_then(Value::as_i64)
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|d| d.year())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_accessor_reads_nested_values() {
        let summary = serde_json::json!({
            "summaryDetail": {"trailingPE": {"raw": 27.4, "fmt": "27.40"}}
        });
        assert_eq!(raw(&summary, "summaryDetail", "trailingPE"), Some(27.4));
        assert_eq!(raw(&summary, "summaryDetail", "forwardPE"), None);
    }

    #[test]
    fn fiscal_year_from_end_date() {
        let statement = serde_json::json!({"endDate": {"raw": 1703980800}});
        assert_eq!(end_date_year(&statement), Some(2023));
    }
}
