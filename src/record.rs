use crate::cell::CellValue;
use crate::mapper::{ClaimField, FieldValue};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// One normalized claim row, serialized with the storage table's column names.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClaimRecord {
    pub carrier: Option<String>,
    pub group_name: Option<String>,
    pub claim_number: Option<String>,
    pub subscriber_id: Option<String>,
    pub member_id: Option<String>,
    pub member_custom_id: Option<String>,

    pub incurred_date: Option<NaiveDate>,
    pub paid_date: Option<NaiveDate>,

    pub billed_amount: Option<f64>,
    pub allowed_amount: Option<f64>,
    pub paid_amount: Option<f64>,
    pub member_paid_amount: Option<f64>,

    pub cob_amount: Option<f64>,
    pub coinsurance_amount: Option<f64>,
    pub copayment_amount: Option<f64>,
    pub covered_amount: Option<f64>,
    pub deductible_amount: Option<f64>,
    pub discount_amount: Option<f64>,
    pub not_covered_amount: Option<f64>,

    pub diag_code_principal: Option<String>,
    pub diag_desc_principal: Option<String>,
    pub dx1_code: Option<String>,
    pub dx1_desc: Option<String>,
    pub dx2_code: Option<String>,
    pub dx2_desc: Option<String>,
    pub dx3_code: Option<String>,
    pub dx3_desc: Option<String>,

    pub cpt_code: Option<String>,
    pub cpt_category: Option<String>,
    pub cpt_description: Option<String>,
    pub icd_proc_code_1: Option<String>,
    pub icd_proc_desc_1: Option<String>,
    pub icd_proc_code_2: Option<String>,
    pub icd_proc_desc_2: Option<String>,
    pub drg_code: Option<String>,
    pub drg_description: Option<String>,

    pub service_category: Option<String>,
    pub facility: Option<String>,
    pub benefit_package: Option<String>,

    /// Normalized header => original cell, kept for audit only.
    pub raw_data: BTreeMap<String, CellValue>,
}

impl ClaimRecord {
    /// Store a coerced value. A value whose type does not match the field is ignored.
    pub fn set(&mut self, field: ClaimField, value: FieldValue) {
        match value {
            FieldValue::Text(v) => {
                if let Some(slot) = self.text_slot(field) {
                    *slot = v;
                }
            }
            FieldValue::Date(v) => {
                if let Some(slot) = self.date_slot(field) {
                    *slot = v;
                }
            }
            FieldValue::Decimal(v) => {
                if let Some(slot) = self.decimal_slot(field) {
                    *slot = v;
                }
            }
        }
    }

    fn text_slot(&mut self, field: ClaimField) -> Option<&mut Option<String>> {
        use ClaimField::*;
        Some(match field {
            Carrier => &mut self.carrier,
            GroupName => &mut self.group_name,
            ClaimNumber => &mut self.claim_number,
            SubscriberId => &mut self.subscriber_id,
            MemberId => &mut self.member_id,
            MemberCustomId => &mut self.member_custom_id,
            DiagCodePrincipal => &mut self.diag_code_principal,
            DiagDescPrincipal => &mut self.diag_desc_principal,
            Dx1Code => &mut self.dx1_code,
            Dx1Desc => &mut self.dx1_desc,
            Dx2Code => &mut self.dx2_code,
            Dx2Desc => &mut self.dx2_desc,
            Dx3Code => &mut self.dx3_code,
            Dx3Desc => &mut self.dx3_desc,
            CptCode => &mut self.cpt_code,
            CptCategory => &mut self.cpt_category,
            CptDescription => &mut self.cpt_description,
            IcdProcCode1 => &mut self.icd_proc_code_1,
            IcdProcDesc1 => &mut self.icd_proc_desc_1,
            IcdProcCode2 => &mut self.icd_proc_code_2,
            IcdProcDesc2 => &mut self.icd_proc_desc_2,
            DrgCode => &mut self.drg_code,
            DrgDescription => &mut self.drg_description,
            ServiceCategory => &mut self.service_category,
            Facility => &mut self.facility,
            BenefitPackage => &mut self.benefit_package,
            _ => return None,
        })
    }

    fn date_slot(&mut self, field: ClaimField) -> Option<&mut Option<NaiveDate>> {
        match field {
            ClaimField::IncurredDate => Some(&mut self.incurred_date),
            ClaimField::PaidDate => Some(&mut self.paid_date),
            _ => None,
        }
    }

    fn decimal_slot(&mut self, field: ClaimField) -> Option<&mut Option<f64>> {
        use ClaimField::*;
        Some(match field {
            BilledAmount => &mut self.billed_amount,
            AllowedAmount => &mut self.allowed_amount,
            PaidAmount => &mut self.paid_amount,
            MemberPaidAmount => &mut self.member_paid_amount,
            CobAmount => &mut self.cob_amount,
            CoinsuranceAmount => &mut self.coinsurance_amount,
            CopaymentAmount => &mut self.copayment_amount,
            CoveredAmount => &mut self.covered_amount,
            DeductibleAmount => &mut self.deductible_amount,
            DiscountAmount => &mut self.discount_amount,
            NotCoveredAmount => &mut self.not_covered_amount,
            _ => return None,
        })
    }
}
