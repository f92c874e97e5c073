use serde::Serialize;

pub const LIMITE_DEFECTO: i64 = 10;
pub const LIMITE_MAXIMO: i64 = 100;

/// Envoltura estándar de toda lista paginada de la intranet.
#[derive(Serialize, Debug)]
pub struct ListaPaginada<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub pagina: i64,
    pub paginas: i64,
}

impl<T> ListaPaginada<T> {
    pub fn nueva(data: Vec<T>, total: i64, pagina: i64, limite: i64) -> Self {
        let paginas = if total == 0 {
            0
        } else {
            (total + limite - 1) / limite
        };
        ListaPaginada {
            data,
            total,
            pagina,
            paginas,
        }
    }
}

pub fn pagina(valor: Option<i64>) -> i64 {
    valor.unwrap_or(1).max(1)
}

pub fn limite(valor: Option<i64>) -> i64 {
    valor.unwrap_or(LIMITE_DEFECTO).clamp(1, LIMITE_MAXIMO)
}

pub fn offset(pagina: i64, limite: i64) -> i64 {
    (pagina - 1) * limite
}

/// Término de búsqueda listo para ILIKE, o None si vino vacío.
pub fn patron_busqueda(valor: &Option<String>) -> Option<String> {
    valor
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| format!("%{}%", v))
}

/// Prefijo de ubigeo saneado para filtros LIKE 'xx%'. Solo dígitos, con
/// el largo de un nivel real: 2 (departamento), 4 (provincia) o
/// 6 (distrito).
pub fn prefijo_ubigeo(valor: &Option<String>) -> Option<String> {
    valor
        .as_deref()
        .map(str::trim)
        .filter(|v| matches!(v.len(), 2 | 4 | 6) && v.chars().all(|c| c.is_ascii_digit()))
        .map(|v| format!("{}%", v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagina_y_limite_se_acotan() {
        assert_eq!(pagina(None), 1);
        assert_eq!(pagina(Some(0)), 1);
        assert_eq!(pagina(Some(-3)), 1);
        assert_eq!(pagina(Some(7)), 7);

        assert_eq!(limite(None), LIMITE_DEFECTO);
        assert_eq!(limite(Some(0)), 1);
        assert_eq!(limite(Some(250)), LIMITE_MAXIMO);
        assert_eq!(limite(Some(25)), 25);
    }

    #[test]
    fn offset_parte_de_cero() {
        assert_eq!(offset(1, 10), 0);
        assert_eq!(offset(3, 10), 20);
    }

    #[test]
    fn paginas_redondea_hacia_arriba() {
        let lista: ListaPaginada<i32> = ListaPaginada::nueva(vec![], 0, 1, 10);
        assert_eq!(lista.paginas, 0);

        let lista: ListaPaginada<i32> = ListaPaginada::nueva(vec![], 21, 1, 10);
        assert_eq!(lista.paginas, 3);

        let lista: ListaPaginada<i32> = ListaPaginada::nueva(vec![], 30, 1, 10);
        assert_eq!(lista.paginas, 3);
    }

    #[test]
    fn patron_busqueda_ignora_vacios() {
        assert_eq!(patron_busqueda(&None), None);
        assert_eq!(patron_busqueda(&Some("  ".into())), None);
        assert_eq!(
            patron_busqueda(&Some(" perez ".into())),
            Some("%perez%".into())
        );
    }

    #[test]
    fn prefijo_ubigeo_exige_digitos_y_largo_de_nivel() {
        assert_eq!(prefijo_ubigeo(&Some("14".into())), Some("14%".into()));
        assert_eq!(prefijo_ubigeo(&Some("1401".into())), Some("1401%".into()));
        assert_eq!(prefijo_ubigeo(&Some("140101".into())), Some("140101%".into()));
        assert_eq!(prefijo_ubigeo(&Some("1".into())), None);
        assert_eq!(prefijo_ubigeo(&Some("140".into())), None);
        assert_eq!(prefijo_ubigeo(&Some("14010".into())), None);
        assert_eq!(prefijo_ubigeo(&Some("14a".into())), None);
        assert_eq!(prefijo_ubigeo(&Some("1401011".into())), None);
    }
}
