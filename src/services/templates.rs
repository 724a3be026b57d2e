use crate::services::types::{ActionKind, EventTemplate};
use std::sync::OnceLock;

static TEMPLATES: OnceLock<Vec<EventTemplate>> = OnceLock::new();

pub fn all() -> &'static [EventTemplate] {
    TEMPLATES.get_or_init(build_templates)
}

pub fn get(id: &str) -> Option<&'static EventTemplate> {
    all().iter().find(|t| t.id == id)
}

pub fn categories() -> Vec<String> {
    let mut seen = Vec::new();
    for template in all() {
        if !seen.contains(&template.category) {
            seen.push(template.category.clone());
        }
    }
    seen
}

pub fn by_category(category: &str) -> Vec<&'static EventTemplate> {
    all().iter().filter(|t| t.category == category).collect()
}

fn template(
    id: &str,
    category: &str,
    name: &str,
    description: &str,
    rule_description: &str,
    sample_sql: &str,
    default_interval_minutes: u32,
    recommended_action: ActionKind,
    diagnostic_questions: &[&str],
    simple_questions: &[&str],
    action_questions: &[&str],
    suggested_process: Option<&str>,
) -> EventTemplate {
    EventTemplate {
        id: id.to_string(),
        category: category.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        rule_description: rule_description.to_string(),
        sample_sql: sample_sql.trim().to_string(),
        default_interval_minutes,
        default_threshold: "rows > 0".to_string(),
        recommended_action,
        diagnostic_questions: diagnostic_questions.iter().map(|s| s.to_string()).collect(),
        simple_questions: simple_questions.iter().map(|s| s.to_string()).collect(),
        action_questions: action_questions.iter().map(|s| s.to_string()).collect(),
        suggested_process: suggested_process.map(|s| s.to_string()),
    }
}

fn build_templates() -> Vec<EventTemplate> {
    vec![
        template(
            "gac-turbidity-rise",
            "여과(GAC)",
            "여과지 탁도 상승",
            "여과 효율 저하 또는 역세 시점 도래를 확인",
            "여과지 탁도가 기준 이동평균 대비 지속적으로 상승하면서 최근 역세 이후에도 개선되지 않은 경우",
            r#"
SELECT
    filter_id,
    turbidity,
    AVG(turbidity) OVER (PARTITION BY filter_id ORDER BY measured_at ROWS BETWEEN 10 PRECEDING AND 1 PRECEDING) as avg_turbidity,
    measured_at
FROM filter_readings
WHERE measured_at >= NOW() - INTERVAL '1 hour'
  AND turbidity > (
    SELECT AVG(turbidity) * 1.2
    FROM filter_readings
    WHERE measured_at >= NOW() - INTERVAL '24 hours'
  )
GROUP BY filter_id, turbidity, measured_at
HAVING COUNT(*) >= 3
"#,
            10,
            ActionKind::Alert,
            &["현재 탁도 동향은 어떠한가요?", "어떤 여과지인가요?", "최근 역세 이후 상태는?"],
            &["역세해도 탁도가 왜 안 떨어져요?"],
            &["역세 시점을 앞당겨야 하나요?"],
            Some("역세_스케줄_조정"),
        ),
        template(
            "gac-backwash-error",
            "여과(GAC)",
            "역세 제어오류/역세 불량",
            "역세 지연 또는 역세 수문 동시 가동 오류 확인",
            "역세 스케줄이 도래했으나 배수지/상수 수위 제약으로 역세 순서가 지연되거나 10회 이상 지연",
            r#"
SELECT
    filter_id,
    scheduled_time,
    actual_time,
    delay_count,
    water_level,
    status
FROM backwash_schedule
WHERE scheduled_time <= NOW()
  AND (actual_time IS NULL OR delay_count >= 10)
  AND status IN ('PENDING', 'DELAYED')
ORDER BY scheduled_time
"#,
            5,
            ActionKind::Alert,
            &["지금 수위 조건 어때요?", "역세 순서가 밀린 이유는?"],
            &["이건 왜 안 돼요?"],
            &["어떻게 해야 돼요?"],
            Some("역세_수동_제어"),
        ),
        template(
            "intake-water-level-risk",
            "착수",
            "정수지 수위 위험",
            "Human-in-the-loop 한 통보 및 상태 확인 필요",
            "정수지 수위가 정상 범위(하한/상한)를 초과하거나 반복적으로 조건 발생 중인 경우",
            r#"
SELECT
    tank_id,
    water_level,
    lower_limit,
    upper_limit,
    measured_at,
    CASE
        WHEN water_level < lower_limit THEN 'LOW'
        WHEN water_level > upper_limit THEN 'HIGH'
        ELSE 'NORMAL'
    END as status
FROM water_tank_levels
WHERE measured_at >= NOW() - INTERVAL '30 minutes'
  AND (water_level < lower_limit OR water_level > upper_limit)
ORDER BY measured_at DESC
"#,
            5,
            ActionKind::Alert,
            &["어떤 탱크가 문제인가요?", "어떤 여과 가동률로 분리해야 하는가?"],
            &["수위가 왜 이래요?"],
            &["펌프 가동률을 조정해야 하나요?"],
            Some("펌프_가동률_조정"),
        ),
        template(
            "intake-pump-combination-fail",
            "착수",
            "펌프 조합 실패",
            "Human-in-the-loop 한 통보 및 상태 확인 필요",
            "AI가 도출한 펌프 조합이 현장 조건을 충족하지 못할 때 (충돌 포함)",
            r#"
SELECT
    recommendation_id,
    pump_combination,
    failure_reason,
    constraint_violated,
    created_at
FROM pump_recommendations
WHERE status = 'FAILED'
  AND created_at >= NOW() - INTERVAL '1 hour'
ORDER BY created_at DESC
"#,
            10,
            ActionKind::Alert,
            &["왜 실패했어요?", "어떤 제약 조건이 위반됐나요?"],
            &["왜?"],
            &["수동으로 조합을 설정해야 하나요?"],
            Some("펌프_수동_제어"),
        ),
        template(
            "chemical-algorithm-error",
            "약품",
            "약품 알고리즘 분석 오류",
            "제어 제외 및 여과 공정 영향 가능",
            "약품 제어에 필요한 센서 데이터에 결측 또는 측정값 급등락이 발생한 경우",
            r#"
SELECT
    sensor_id,
    sensor_type,
    value,
    prev_value,
    ABS(value - prev_value) / NULLIF(prev_value, 0) * 100 as change_percent,
    measured_at
FROM chemical_sensor_readings
WHERE measured_at >= NOW() - INTERVAL '30 minutes'
  AND (
    value IS NULL
    OR ABS(value - prev_value) / NULLIF(prev_value, 0) > 0.5
  )
ORDER BY measured_at DESC
"#,
            5,
            ActionKind::Alert,
            &["가동 전진 시간은 얼마인가요?", "어떤 센서에서 오류가 발생했나요?"],
            &["센서 데이터가 왜 이상해요?"],
            &["수동 제어로 전환해야 하나요?"],
            Some("약품_수동_제어"),
        ),
        template(
            "sedimentation-sludge-collector",
            "침전",
            "슬러지 수집기 가동 이상",
            "모터 또는 배관 신호로 진단 필요",
            "슬러지 발생량 동향 또는 플로우 측정 기준에 비해 배수량이 낮아지거나 막힘 의심 시",
            r#"
SELECT
    collector_id,
    sludge_flow,
    expected_flow,
    motor_current,
    (expected_flow - sludge_flow) / NULLIF(expected_flow, 0) * 100 as flow_deficit_percent,
    measured_at
FROM sludge_collector_readings
WHERE measured_at >= NOW() - INTERVAL '1 hour'
  AND sludge_flow < expected_flow * 0.7
ORDER BY measured_at DESC
"#,
            15,
            ActionKind::Process,
            &["어디가 문제예요?", "막힘인가요 아니면 모터 문제인가요?"],
            &["왜 배수량이 적어요?"],
            &["점검을 요청해야 하나요?"],
            Some("설비_점검_요청"),
        ),
        template(
            "ems-peak-forecast",
            "EMS",
            "향후 피크 정보",
            "비용 절감을 위한 사전 제어 권고",
            "AI 전력 예측 결과 계약 전력 또는 내부 기준 초과일 경우",
            r#"
SELECT
    forecast_time,
    predicted_power_kw,
    contract_limit_kw,
    internal_limit_kw,
    predicted_power_kw - contract_limit_kw as over_contract,
    confidence
FROM power_forecast
WHERE forecast_time BETWEEN NOW() AND NOW() + INTERVAL '2 hours'
  AND predicted_power_kw > contract_limit_kw * 0.9
ORDER BY forecast_time
"#,
            30,
            ActionKind::Process,
            &["부하 예측도 해줘요?", "피크 시간대는 언제인가요?"],
            &["얼마 정도 절약해요?"],
            &["부하를 분산시켜야 하나요?"],
            Some("부하_분산_제어"),
        ),
        template(
            "system-ai-failure",
            "통합(HW/SW)",
            "AI 분석/데이터 수집 실패",
            "운영 환경 점검 통보",
            "AI 서버 Docker, 시각화 서버 또는 데이터 파이프라인 오류 발생 시",
            r#"
SELECT
    service_name,
    status,
    error_message,
    last_heartbeat,
    NOW() - last_heartbeat as downtime
FROM system_health
WHERE status != 'HEALTHY'
  OR last_heartbeat < NOW() - INTERVAL '5 minutes'
ORDER BY last_heartbeat DESC
"#,
            1,
            ActionKind::Alert,
            &["어떤 서비스가 문제인가요?", "언제부터 문제가 발생했나요?"],
            &["시스템이 왜 안 돼요?"],
            &["재시작해야 하나요?"],
            Some("서비스_재시작"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_has_eight_templates_across_six_categories() {
        assert_eq!(all().len(), 8);
        assert_eq!(categories().len(), 6);
    }

    #[test]
    fn by_category_filters_correctly() {
        assert_eq!(by_category("여과(GAC)").len(), 2);
        assert_eq!(by_category("착수").len(), 2);
        assert_eq!(by_category("EMS").len(), 1);
        assert!(by_category("nonexistent").is_empty());
    }

    #[test]
    fn get_finds_by_id() {
        let t = get("gac-turbidity-rise").expect("should exist");
        assert_eq!(t.category, "여과(GAC)");
        assert_eq!(t.recommended_action, ActionKind::Alert);
        assert!(get("does-not-exist").is_none());
    }
}
